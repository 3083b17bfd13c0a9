//! The bridge facade: one guest runtime, one handle table, one fatal state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{Handle, HandleTable, StackFrame};
use crate::types::{GuestId, GuestRuntime, HostValue};

use super::finalizer::FinalizerRegistry;

/// Tunables for one bridge instance.
#[derive(Clone, Copy, Debug)]
pub struct BridgeConfig {
    /// Capture the guest type and repr into destroyed-wrapper messages.
    /// Costs an extra boundary call per destroy, which can itself fail, so
    /// it is off by default.
    pub diagnostics: bool,
    /// Handle table slot-array growth increment.
    pub slot_chunk: usize,
    /// Register new wrappers with the finalizer backstop unless a
    /// construction option says otherwise.
    pub register_finalizers: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            diagnostics: false,
            slot_chunk: 64,
            register_finalizers: true,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FatalState {
    Usable,
    Handling,
    Failed,
}

pub(crate) struct BridgeInner<G: GuestRuntime, V: HostValue> {
    pub(crate) guest: G,
    pub(crate) table: RefCell<HandleTable<V>>,
    pub(crate) registry: FinalizerRegistry<G, V>,
    pub(crate) fatal: Cell<FatalState>,
    pub(crate) on_fatal: RefCell<Option<Box<dyn FnOnce(&BridgeError)>>>,
    pub(crate) config: BridgeConfig,
}

impl<G: GuestRuntime, V: HostValue> BridgeInner<G, V> {
    /// Every public entry point goes through here; after a fatal error the
    /// whole surface answers with [`BridgeError::Fatal`].
    pub(crate) fn ensure_usable(&self) -> BridgeResult<()> {
        if self.fatal.get() == FatalState::Usable {
            Ok(())
        } else {
            Err(BridgeError::Fatal)
        }
    }
}

/// The cross-runtime object bridge.
///
/// Owns the guest runtime, the handle table that lets the guest hold host
/// values, the wrapper machinery that lets host code hold guest objects, and
/// the fatal state that disables everything once an unrecoverable failure is
/// seen.
///
/// The bridge is single-threaded cooperative: cloning it is a cheap
/// reference clone for handing to collaborators on the same logical thread,
/// not a concurrency primitive.
pub struct Bridge<G: GuestRuntime, V: HostValue> {
    pub(crate) inner: Rc<BridgeInner<G, V>>,
}

impl<G: GuestRuntime, V: HostValue> Clone for Bridge<G, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<G: GuestRuntime, V: HostValue> Bridge<G, V> {
    pub fn new(guest: G) -> Self {
        Self::with_config(guest, BridgeConfig::default())
    }

    pub fn with_config(guest: G, config: BridgeConfig) -> Self {
        Self {
            inner: Rc::new(BridgeInner {
                guest,
                table: RefCell::new(HandleTable::with_chunk(config.slot_chunk)),
                registry: FinalizerRegistry::new(),
                fatal: Cell::new(FatalState::Usable),
                on_fatal: RefCell::new(None),
                config,
            }),
        }
    }

    pub fn guest(&self) -> &G {
        &self.inner.guest
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    // ---- handle table surface (container-conversion collaborator) ----

    /// Allocate a heap-class handle for a host value.
    pub fn new_value(&self, value: V) -> BridgeResult<Handle> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().new_value(value))
    }

    /// Allocate a stack-class handle for a temporary of the current call.
    pub fn new_stack(&self, value: V) -> BridgeResult<Handle> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().new_stack(value))
    }

    /// Intern a value for the process lifetime, deduplicated by identity.
    pub fn intern(&self, value: V) -> BridgeResult<Handle> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().intern(value))
    }

    /// Resolve a handle to (a reference clone of) its host value.
    pub fn get(&self, handle: Handle) -> BridgeResult<V> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow().get(handle)?.clone())
    }

    pub fn incref(&self, handle: Handle) -> BridgeResult<Handle> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().incref(handle)?)
    }

    pub fn decref(&self, handle: Handle) -> BridgeResult<()> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().decref(handle)?)
    }

    /// `get` + `decref` for a handle being consumed exactly once.
    pub fn pop(&self, handle: Handle) -> BridgeResult<V> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().pop(handle)?)
    }

    /// If the value behind `handle` is itself a wrapper around a guest
    /// object, return that object so callers unwrap instead of
    /// double-wrapping.
    pub fn unwrap_guest(&self, handle: Handle) -> BridgeResult<Option<GuestId>> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow().get(handle)?.as_guest())
    }

    /// Number of occupied heap slots, for leak checks.
    pub fn live_handles(&self) -> usize {
        self.inner.table.borrow().len()
    }

    pub fn stack_depth(&self) -> usize {
        self.inner.table.borrow().stack_depth()
    }

    // ---- stack-switching collaborator surface ----

    /// Detach the stack-class frame above `base` as opaque continuation
    /// state. Heap and immortal handles stay valid across any number of
    /// suspend/resume cycles.
    pub fn save_stack_frame(&self, base: usize) -> BridgeResult<StackFrame<V>> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().save_stack_frame(base)?)
    }

    /// Reattach a saved frame at the exact depth it was detached at.
    pub fn restore_stack_frame(&self, frame: StackFrame<V>) -> BridgeResult<()> {
        self.inner.ensure_usable()?;
        Ok(self.inner.table.borrow_mut().restore_stack_frame(frame)?)
    }

    // ---- finalizer backstop ----

    /// Reclaim wrappers every alias of which was dropped without `destroy`.
    ///
    /// The embedding host calls this opportunistically (e.g. from a GC
    /// callback or an idle hook). Returns the number of wrappers reclaimed.
    /// This is a backstop, never a substitute for explicit `destroy`.
    pub fn run_finalizers(&self) -> usize {
        if self.inner.ensure_usable().is_err() {
            return 0;
        }
        self.inner.registry.sweep(&self.inner)
    }
}
