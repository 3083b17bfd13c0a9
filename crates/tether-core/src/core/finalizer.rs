//! Finalizer backstop for wrapper groups dropped without `destroy`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::types::{GuestRuntime, HostValue};

use super::bridge::BridgeInner;
use super::proxy::{finalize_shared, ProxyLife, SharedRef};

struct FinalizerEntry<G: GuestRuntime, V: HostValue> {
    /// Weak so the registry never keeps a group's aliases alive.
    life: Weak<ProxyLife>,
    /// Strong so the shared record can still be torn down after every alias
    /// is gone.
    shared: SharedRef<G, V>,
}

pub(crate) struct FinalizerRegistry<G: GuestRuntime, V: HostValue> {
    entries: RefCell<Vec<FinalizerEntry<G, V>>>,
}

impl<G: GuestRuntime, V: HostValue> FinalizerRegistry<G, V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, life: &Rc<ProxyLife>, shared: &SharedRef<G, V>) {
        self.entries.borrow_mut().push(FinalizerEntry {
            life: Rc::downgrade(life),
            shared: Rc::clone(shared),
        });
    }

    /// Explicit destroy beat the backstop to it; drop the entry.
    pub(crate) fn unregister(&self, shared: &SharedRef<G, V>) {
        self.entries
            .borrow_mut()
            .retain(|entry| !Rc::ptr_eq(&entry.shared, shared));
    }

    /// Reclaim every group whose aliases have all been dropped.
    ///
    /// Dead entries are drained out of the registry before any teardown
    /// runs: finalizing a group can cascade into its attribute cache, which
    /// unregisters children and would otherwise re-enter the entry list.
    pub(crate) fn sweep(&self, bridge: &Rc<BridgeInner<G, V>>) -> usize {
        let dead: Vec<SharedRef<G, V>> = {
            let mut entries = self.entries.borrow_mut();
            let mut dead = Vec::new();
            entries.retain(|entry| {
                if entry.life.strong_count() == 0 {
                    dead.push(Rc::clone(&entry.shared));
                    false
                } else {
                    true
                }
            });
            dead
        };
        let reclaimed = dead.len();
        for shared in &dead {
            finalize_shared(bridge, shared);
        }
        reclaimed
    }
}
