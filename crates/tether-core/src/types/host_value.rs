//! Host-side value seam.

use crate::error::HostFailure;

use super::GuestId;

/// Identity token for a host value, used to deduplicate immortal entries.
///
/// Two host values with the same `ObjectId` are the same object as far as
/// interning is concerned; equality of contents is irrelevant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectId(pub u64);

/// A value owned by the garbage-collected host runtime.
///
/// The bridge treats host values as opaque; this trait is the whole contract.
/// `Clone` is expected to be a cheap reference clone (the host's values are
/// reference-semantic), not a deep copy.
pub trait HostValue: Clone {
    /// Stable identity of the underlying host object.
    fn object_id(&self) -> ObjectId;

    /// Build the opaque wrapped error value handed to the guest when a
    /// host-side failure crosses the boundary.
    fn wrap_failure(failure: &HostFailure) -> Self;

    /// If this host value is itself a wrapper around a guest object, return
    /// the wrapped object. The container-conversion collaborator uses this
    /// to unwrap instead of double-wrapping.
    fn as_guest(&self) -> Option<GuestId> {
        None
    }
}
