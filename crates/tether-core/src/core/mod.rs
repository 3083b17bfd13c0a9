//! Bridge assembly: the facade, the wrapper ownership model, the finalizer
//! backstop, and the boundary error protocol.

mod boundary;
mod bridge;
mod finalizer;
mod proxy;

pub use boundary::synthesize_traceback;
pub use bridge::{Bridge, BridgeConfig};
pub use proxy::{Proxy, ProxyIterator, WrapOptions};
