//! Handle table and handle tokens.
//!
//! ## Key Types
//!
//! - [`Handle`]: three-class token (immortal, stack, heap) for a host value
//! - [`HandleTable`]: generational registry issuing and recycling handles
//! - [`StackFrame`]: detached stack-class frame carried across a suspension

mod handle;
mod table;

pub use handle::Handle;
pub use table::{HandleTable, StackFrame};
