//! Per-object capability flags reported by the guest.

use bitflags::bitflags;

bitflags! {
    /// What a guest object can do, as reported by the guest interpreter.
    ///
    /// The set is snapshotted into the wrapper's shared record at
    /// construction time; wrapper operations check it before crossing the
    /// boundary so an unsupported operation fails without a guest call.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct Capabilities: u32 {
        /// Reports a length.
        const LENGTHFUL = 1 << 0;
        /// Supports element lookup by key.
        const GETITEM = 1 << 1;
        /// Supports element assignment by key.
        const SETITEM = 1 << 2;
        /// Supports element deletion by key.
        const DELITEM = 1 << 3;
        /// Supports membership tests.
        const CONTAINS = 1 << 4;
        /// Produces a single-shot forward iterator.
        const ITERABLE = 1 << 5;
        /// Can be called with positional and keyword arguments.
        const CALLABLE = 1 << 6;
        /// Resolves to a guest future.
        const AWAITABLE = 1 << 7;
    }
}
