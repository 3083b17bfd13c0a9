//! Guest interpreter seam.

use thiserror::Error;

use crate::error::TracebackFrame;
use crate::runtime::Handle;

use super::Capabilities;

/// Opaque token naming an object owned by the guest interpreter.
///
/// The bridge never inspects it; it is the moral equivalent of the guest's
/// own object pointer. Holding a `GuestId` does not keep the object alive —
/// ownership is expressed through [`GuestRuntime::incref`] and
/// [`GuestRuntime::decref`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GuestId(pub u64);

/// An error recorded by, or on behalf of, the guest interpreter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GuestError {
    /// Guest-side error class name, e.g. `TypeError`.
    pub kind: String,
    pub message: String,
}

impl GuestError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// The reference-counted guest interpreter, specified at its interface only.
///
/// Every method is a synchronous boundary call on the single logical thread
/// the bridge runs on. Methods returning `GuestId` transfer one reference to
/// the caller; the caller releases it with [`decref`](Self::decref) once a
/// wrapper (or another owner) has taken its own.
///
/// `Option<GuestId>` results distinguish "missing" from "present but falsy":
/// a missing attribute or element is `Ok(None)`, never an error.
pub trait GuestRuntime {
    fn incref(&self, obj: GuestId);
    fn decref(&self, obj: GuestId);

    /// Capability set of one object, snapshotted at wrapper construction.
    fn capabilities(&self, obj: GuestId) -> Capabilities;

    /// Guest-side type name, for diagnostics. Must not raise.
    fn type_name(&self, obj: GuestId) -> String;

    /// Guest-side printable representation. May raise, and producing it is a
    /// boundary call, so it is only requested when diagnostics are enabled.
    fn repr(&self, obj: GuestId) -> Result<String, GuestError>;

    fn getattr(&self, obj: GuestId, key: &str) -> Result<Option<GuestId>, GuestError>;
    fn setattr(&self, obj: GuestId, key: &str, value: GuestId) -> Result<(), GuestError>;
    fn delattr(&self, obj: GuestId, key: &str) -> Result<(), GuestError>;
    fn hasattr(&self, obj: GuestId, key: &str) -> Result<bool, GuestError>;

    fn get_item(&self, obj: GuestId, key: GuestId) -> Result<Option<GuestId>, GuestError>;
    fn set_item(&self, obj: GuestId, key: GuestId, value: GuestId) -> Result<(), GuestError>;
    fn del_item(&self, obj: GuestId, key: GuestId) -> Result<(), GuestError>;
    fn contains(&self, obj: GuestId, key: GuestId) -> Result<bool, GuestError>;

    fn length(&self, obj: GuestId) -> Result<usize, GuestError>;

    /// Call a callable object with positional and keyword-style arguments.
    fn call(
        &self,
        obj: GuestId,
        args: &[GuestId],
        kwargs: &[(&str, GuestId)],
    ) -> Result<GuestId, GuestError>;

    /// Produce a fresh single-shot iterator over an iterable object.
    fn iterator(&self, obj: GuestId) -> Result<GuestId, GuestError>;

    /// Advance an iterator. `Ok(None)` means exhausted.
    fn iter_next(&self, iter: GuestId) -> Result<Option<GuestId>, GuestError>;

    /// Resolve an awaitable object to a guest future.
    fn as_future(&self, obj: GuestId) -> Result<GuestId, GuestError>;

    /// True if an error indicator is currently recorded on the guest side.
    fn error_pending(&self) -> bool;

    /// Remove and return the recorded error indicator, if any.
    fn take_pending_error(&self) -> Option<GuestError>;

    /// Restore a previously taken guest error as the pending indicator.
    fn set_pending_error(&self, error: GuestError);

    /// Record a translated host failure as the pending indicator. `error` is
    /// a handle to the opaque wrapped host error value; the guest takes
    /// ownership of it. `frames` is the synthesized traceback, outermost
    /// call first, with the bridge's own frames already filtered out.
    fn set_host_error(&self, error: Handle, message: &str, frames: &[TracebackFrame]);
}
