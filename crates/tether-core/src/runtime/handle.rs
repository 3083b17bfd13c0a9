//! Handle tokens issued by the handle table.

use std::fmt;

/// A token standing in for a host value inside the guest runtime.
///
/// Handles come in three classes with different cost/lifetime tradeoffs. The
/// class tag is the enum discriminant; a handle is meaningless without the
/// table that issued it and must never be persisted outside one loaded
/// instance of the bridge.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Handle {
    /// Process-lifetime entry, deduplicated by host-side identity.
    Immortal(u32),
    /// LIFO temporary, valid only for the duration of the current boundary
    /// call and released in exact reverse order of acquisition.
    Stack(u32),
    /// Refcounted slot. The generation detects reuse of a freed slot, so a
    /// stale handle fails instead of silently reading a different value.
    Heap { index: u32, generation: u32 },
}

impl Handle {
    pub fn is_immortal(&self) -> bool {
        matches!(self, Handle::Immortal(_))
    }

    pub fn is_stack(&self) -> bool {
        matches!(self, Handle::Stack(_))
    }

    pub fn is_heap(&self) -> bool {
        matches!(self, Handle::Heap { .. })
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Immortal(index) => write!(f, "immortal:{index}"),
            Handle::Stack(index) => write!(f, "stack:{index}"),
            Handle::Heap { index, generation } => write!(f, "heap:{index}@{generation}"),
        }
    }
}
