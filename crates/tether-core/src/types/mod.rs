//! Boundary seams: host value contract, guest runtime contract, capabilities.

mod capabilities;
mod guest;
mod host_value;

pub use capabilities::Capabilities;
pub use guest::{GuestError, GuestId, GuestRuntime};
pub use host_value::{HostValue, ObjectId};
