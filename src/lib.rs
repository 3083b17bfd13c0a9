pub use tether_core::core;
pub use tether_core::error;
pub use tether_core::runtime;
pub use tether_core::types;

// Re-export main types
pub mod prelude {
    pub use crate::core::{Bridge, BridgeConfig, Proxy, ProxyIterator, WrapOptions};
    pub use crate::error::{
        clear_internal_fault, internal_fault_tripped, BridgeError, BridgeResult, HostFailure,
        InvalidHandle, TracebackFrame,
    };
    pub use crate::runtime::{Handle, HandleTable, StackFrame};
    pub use crate::types::{
        Capabilities, GuestError, GuestId, GuestRuntime, HostValue, ObjectId,
    };
}
