//! Unified error types for the bridge.
//!
//! The taxonomy is a closed enum so that propagation decisions are exhaustive:
//!
//! ```text
//! BridgeError (top-level)
//! ├── InvalidHandle      - handle table misuse (programming error, fail loudly)
//! ├── UseAfterDestroy    - operation on a destroyed wrapper (recoverable)
//! ├── AlreadyPropagated  - guest error indicator already set, do not re-wrap
//! ├── Guest              - an error raised by the guest interpreter
//! ├── Host               - a host-side failure crossing into the guest
//! ├── Unsupported        - capability miss on a wrapper operation
//! └── Fatal              - terminal; the bridge surface is disabled
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::types::GuestError;

pub type BridgeResult<T> = anyhow::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Generation mismatch, out-of-range index, or out-of-order stack release.
    /// Always a programming error in boundary-crossing code, never induced by
    /// user-level values; the table may be unreliable once this is seen.
    #[error(transparent)]
    InvalidHandle(#[from] InvalidHandle),

    /// Operation attempted on a wrapper whose handle has been cleared. The
    /// message carries the guest type and repr when diagnostics are enabled.
    #[error("{0}")]
    UseAfterDestroy(String),

    /// A failure is already recorded on the guest error indicator. Callers
    /// must propagate this unchanged and never construct a second error.
    #[error("guest error indicator is already set")]
    AlreadyPropagated,

    /// An error raised by the guest interpreter during a boundary call.
    #[error(transparent)]
    Guest(#[from] GuestError),

    /// A host-side exception crossing the boundary toward the guest.
    #[error(transparent)]
    Host(#[from] HostFailure),

    /// The wrapped guest object does not report the capability this
    /// operation requires.
    #[error("object of type {type_name:?} does not support {op}")]
    Unsupported { op: &'static str, type_name: String },

    /// The bridge suffered an unrecoverable failure earlier; every public
    /// entry point returns this from then on.
    #[error("the bridge already fatally failed and can no longer be used")]
    Fatal,
}

/// Handle table misuse, split by the discipline that was violated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidHandle {
    #[error("stale heap handle: slot {index} no longer holds generation {generation}")]
    Stale { index: u32, generation: u32 },

    #[error("heap handle slot {index} is out of range")]
    SlotOutOfRange { index: u32 },

    #[error("stack handle {index} is out of range (stack depth {depth})")]
    StackOutOfRange { index: u32, depth: usize },

    #[error("stack handle {index} released out of order (stack depth {depth})")]
    StackOrder { index: u32, depth: usize },

    #[error("stack frame restored at depth {depth}, expected {expected}")]
    FrameDepth { expected: usize, depth: usize },

    #[error("immortal handle {index} is out of range")]
    ImmortalOutOfRange { index: u32 },
}

/// An exception raised by host code invoked through a wrapper, together with
/// the raw host stack capture when one was available.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("host failure: {message}")]
pub struct HostFailure {
    pub message: String,
    pub stack: Option<String>,
}

impl HostFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

/// One synthesized guest traceback frame, parsed from a host stack capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracebackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

// Invalid handles mean the table itself may be corrupted, so in addition to
// the returned error a process-wide flag is tripped for test harnesses to
// inspect, mirroring loud console reporting in interactive embeddings.
static INTERNAL_FAULT: AtomicBool = AtomicBool::new(false);

pub(crate) fn mark_internal_fault() {
    INTERNAL_FAULT.store(true, Ordering::Relaxed);
}

/// True if any internal-invariant violation was observed since the last
/// [`clear_internal_fault`]. Test harnesses fail the run when set.
pub fn internal_fault_tripped() -> bool {
    INTERNAL_FAULT.load(Ordering::Relaxed)
}

pub fn clear_internal_fault() {
    INTERNAL_FAULT.store(false, Ordering::Relaxed);
}
