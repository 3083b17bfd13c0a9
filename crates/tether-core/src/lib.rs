//! Object bridge between a reference-counted guest interpreter and a
//! garbage-collected host runtime, for embeddings where the two share one
//! logical thread.
//!
//! Three pieces cooperate:
//!
//! - [`runtime`]: the handle table through which the guest holds host values,
//!   with heap (refcounted), stack (LIFO temporaries), and immortal
//!   (interned, process-lifetime) handle classes.
//! - [`core`]: the [`Bridge`] facade, host-side [`Proxy`] wrappers around
//!   guest objects with explicit destroy semantics and a finalizer backstop,
//!   and the boundary error protocol.
//! - [`types`]: the seams — [`GuestRuntime`] for the interpreter,
//!   [`HostValue`] for the host's values.
//!
//! The bridge is single-threaded cooperative by construction; nothing here
//! is `Send` or `Sync`.

pub mod core;
pub mod error;
pub mod runtime;
pub mod types;

pub use crate::core::{synthesize_traceback, Bridge, BridgeConfig, Proxy, ProxyIterator, WrapOptions};
pub use error::{
    clear_internal_fault, internal_fault_tripped, BridgeError, BridgeResult, HostFailure,
    InvalidHandle, TracebackFrame,
};
pub use runtime::{Handle, HandleTable, StackFrame};
pub use types::{Capabilities, GuestError, GuestId, GuestRuntime, HostValue, ObjectId};
