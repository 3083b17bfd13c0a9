//! Host-side wrappers around guest objects.
//!
//! A wrapper owns exactly one guest reference no matter how many aliases of
//! it exist; `destroy` releases that reference and poisons every alias at
//! once. `copy` takes a second guest reference with an independent lifetime
//! that shares only the attribute cache.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{BridgeError, BridgeResult};
use crate::types::{Capabilities, GuestId, GuestRuntime, HostValue};

use super::bridge::{Bridge, BridgeInner};

pub(crate) const DESTROYED_MSG: &str = "Object has already been destroyed";

const CACHE_DESTROYED_MSG: &str = "This borrowed attribute wrapper was \
     automatically destroyed in the process of destroying the wrapper it was \
     borrowed from. Try using the 'copy' method.";

const LEAKED_MSG: &str = "Object was reclaimed by the finalizer backstop \
     because every alias of its wrapper was dropped without destroy()";

pub(crate) type SharedRef<G, V> = Rc<RefCell<Shared<G, V>>>;
pub(crate) type CacheRef<G, V> = Rc<RefCell<AttrCache<G, V>>>;

/// State shared by every alias of one wrapper.
pub(crate) struct Shared<G: GuestRuntime, V: HostValue> {
    /// The wrapped guest object; `None` once destroyed. The wrapper group
    /// holds exactly one guest reference through this field.
    pub(crate) handle: Option<GuestId>,
    pub(crate) cache: CacheRef<G, V>,
    /// Capability set snapshotted at construction.
    pub(crate) flags: Capabilities,
    /// Owned reference to the guest future, filled by the first await so
    /// re-awaiting the same wrapper observes the same resolution.
    pub(crate) pending_future: Option<GuestId>,
    pub(crate) destroyed_msg: Option<String>,
    pub(crate) registered: bool,
}

/// Attribute lookup cache, shared between a wrapper group and its copies.
///
/// Refcounted separately from the wrappers themselves: the last group to be
/// destroyed tears the cached children down.
pub(crate) struct AttrCache<G: GuestRuntime, V: HostValue> {
    pub(crate) entries: FxHashMap<String, Proxy<G, V>>,
    pub(crate) refcount: u32,
    /// Set when the finalizer backstop reclaims an owner: liveness of the
    /// cached children is then unknown, so teardown skips destroying them
    /// and leaves each to its own finalizer entry.
    pub(crate) leaked: bool,
}

impl<G: GuestRuntime, V: HostValue> AttrCache<G, V> {
    fn new() -> CacheRef<G, V> {
        Rc::new(RefCell::new(Self {
            entries: FxHashMap::default(),
            refcount: 0,
            leaked: false,
        }))
    }
}

/// Alias-liveness sentinel. Every alias holds a strong count on its group's
/// `ProxyLife`; the finalizer registry holds only a weak one, so a strong
/// count of zero means the whole group was dropped without `destroy`.
pub(crate) struct ProxyLife;

/// Bound positional arguments, owning one guest reference per argument.
struct BoundArgs<G: GuestRuntime, V: HostValue> {
    bridge: Rc<BridgeInner<G, V>>,
    args: Vec<GuestId>,
}

impl<G: GuestRuntime, V: HostValue> Drop for BoundArgs<G, V> {
    fn drop(&mut self) {
        for &arg in &self.args {
            self.bridge.guest.decref(arg);
        }
    }
}

/// Per-alias call behavior. Unlike [`Shared`], this does not follow the
/// group: `bind` and `capture_caller` produce aliases with different props.
struct ProxyProps<G: GuestRuntime, V: HostValue> {
    bound: Option<Rc<BoundArgs<G, V>>>,
    capture_caller: bool,
}

impl<G: GuestRuntime, V: HostValue> ProxyProps<G, V> {
    fn plain() -> Self {
        Self {
            bound: None,
            capture_caller: false,
        }
    }
}

impl<G: GuestRuntime, V: HostValue> Clone for ProxyProps<G, V> {
    fn clone(&self) -> Self {
        Self {
            bound: self.bound.clone(),
            capture_caller: self.capture_caller,
        }
    }
}

/// Options for [`Bridge::wrap_with`].
#[derive(Clone, Copy, Debug)]
pub struct WrapOptions {
    /// Register the wrapper with the finalizer backstop. Callers that
    /// guarantee explicit destruction (e.g. scope guards) can opt out.
    pub register_finalizer: bool,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            register_finalizer: true,
        }
    }
}

/// A host-side wrapper around one guest object.
///
/// `Clone` produces an alias: same guest reference, same lifetime, destroyed
/// together. Use [`copy`](Proxy::copy) for an independent lifetime.
pub struct Proxy<G: GuestRuntime, V: HostValue> {
    shared: SharedRef<G, V>,
    life: Rc<ProxyLife>,
    props: ProxyProps<G, V>,
    bridge: Rc<BridgeInner<G, V>>,
}

impl<G: GuestRuntime, V: HostValue> Clone for Proxy<G, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            life: Rc::clone(&self.life),
            props: self.props.clone(),
            bridge: Rc::clone(&self.bridge),
        }
    }
}

impl<G: GuestRuntime, V: HostValue> fmt::Debug for Proxy<G, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("Proxy")
            .field("guest", &shared.handle)
            .field("flags", &shared.flags)
            .finish()
    }
}

impl<G: GuestRuntime, V: HostValue> Bridge<G, V> {
    /// Wrap a guest object in a fresh wrapper group.
    ///
    /// Takes one new guest reference; the caller keeps (and remains
    /// responsible for) whatever references it already held on `obj`.
    pub fn wrap(&self, obj: GuestId) -> BridgeResult<Proxy<G, V>> {
        self.wrap_with(obj, WrapOptions::default())
    }

    pub fn wrap_with(&self, obj: GuestId, options: WrapOptions) -> BridgeResult<Proxy<G, V>> {
        self.inner.ensure_usable()?;
        Ok(Proxy::construct(
            &self.inner,
            obj,
            None,
            options.register_finalizer && self.inner.config.register_finalizers,
            ProxyProps::plain(),
        ))
    }
}

impl<G: GuestRuntime, V: HostValue> Proxy<G, V> {
    fn construct(
        bridge: &Rc<BridgeInner<G, V>>,
        obj: GuestId,
        cache: Option<CacheRef<G, V>>,
        register: bool,
        props: ProxyProps<G, V>,
    ) -> Self {
        let cache = cache.unwrap_or_else(AttrCache::new);
        cache.borrow_mut().refcount += 1;
        bridge.guest.incref(obj);
        let flags = bridge.guest.capabilities(obj);
        let shared = Rc::new(RefCell::new(Shared {
            handle: Some(obj),
            cache,
            flags,
            pending_future: None,
            destroyed_msg: None,
            registered: register,
        }));
        let life = Rc::new(ProxyLife);
        if register {
            bridge.registry.register(&life, &shared);
        }
        Self {
            shared,
            life,
            props,
            bridge: Rc::clone(bridge),
        }
    }

    /// Wrap an owned guest reference: the child already carries one
    /// reference transferred by the guest call, so the extra one taken by
    /// `construct` is paid back immediately.
    fn adopt(&self, owned: GuestId) -> Self {
        let child = Self::construct(
            &self.bridge,
            owned,
            None,
            self.bridge.config.register_finalizers,
            ProxyProps::plain(),
        );
        self.bridge.guest.decref(owned);
        child
    }

    /// The wrapped guest object, or the use-after-destroy report.
    fn guest_id(&self) -> BridgeResult<GuestId> {
        self.bridge.ensure_usable()?;
        let shared = self.shared.borrow();
        match shared.handle {
            Some(obj) => Ok(obj),
            None => Err(BridgeError::UseAfterDestroy(
                shared
                    .destroyed_msg
                    .clone()
                    .unwrap_or_else(|| DESTROYED_MSG.to_string()),
            )),
        }
    }

    fn require(&self, cap: Capabilities, op: &'static str) -> BridgeResult<GuestId> {
        let obj = self.guest_id()?;
        if !self.shared.borrow().flags.contains(cap) {
            return Err(BridgeError::Unsupported {
                op,
                type_name: self.bridge.guest.type_name(obj),
            });
        }
        Ok(obj)
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.borrow().handle.is_none()
    }

    /// True if `other` is an alias of this wrapper (same group, destroyed
    /// together). Copies of the same object are not aliases.
    pub fn is_alias_of(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.shared.borrow().flags
    }

    pub fn type_name(&self) -> BridgeResult<String> {
        let obj = self.guest_id()?;
        Ok(self.bridge.guest.type_name(obj))
    }

    pub fn repr(&self) -> BridgeResult<String> {
        let obj = self.guest_id()?;
        self.bridge.guest_call(|g| g.repr(obj))
    }

    /// Release the group's guest reference and poison every alias.
    ///
    /// Idempotent: destroying an already-destroyed wrapper is a no-op.
    /// `message` overrides the default use-after-destroy report.
    pub fn destroy(&self, message: Option<&str>) -> BridgeResult<()> {
        self.bridge.ensure_usable()?;
        destroy_shared(
            &self.bridge,
            &self.shared,
            message,
            self.bridge.config.diagnostics,
        );
        Ok(())
    }

    /// A new wrapper group for the same guest object: independent lifetime,
    /// independent guest reference, shared attribute cache.
    pub fn copy(&self) -> BridgeResult<Self> {
        let obj = self.guest_id()?;
        let cache = Rc::clone(&self.shared.borrow().cache);
        Ok(Self::construct(
            &self.bridge,
            obj,
            Some(cache),
            self.bridge.config.register_finalizers,
            self.props.clone(),
        ))
    }

    // ---- attributes ----

    /// Look up an attribute, serving repeat lookups from the shared cache.
    /// `Ok(None)` means the attribute does not exist.
    pub fn getattr(&self, key: &str) -> BridgeResult<Option<Self>> {
        let obj = self.guest_id()?;
        let cache = Rc::clone(&self.shared.borrow().cache);
        if let Some(hit) = cache.borrow().entries.get(key) {
            // A destroyed entry is stale, not authoritative: fall through
            // and refetch.
            if !hit.is_destroyed() {
                return Ok(Some(hit.clone()));
            }
        }
        let Some(owned) = self.bridge.guest_call(|g| g.getattr(obj, key))? else {
            cache.borrow_mut().entries.remove(key);
            return Ok(None);
        };
        let child = self.adopt(owned);
        cache
            .borrow_mut()
            .entries
            .insert(key.to_string(), child.clone());
        Ok(Some(child))
    }

    pub fn setattr(&self, key: &str, value: GuestId) -> BridgeResult<()> {
        let obj = self.guest_id()?;
        self.bridge.guest_call(|g| g.setattr(obj, key, value))?;
        self.evict(key);
        Ok(())
    }

    pub fn delattr(&self, key: &str) -> BridgeResult<()> {
        let obj = self.guest_id()?;
        self.bridge.guest_call(|g| g.delattr(obj, key))?;
        self.evict(key);
        Ok(())
    }

    pub fn hasattr(&self, key: &str) -> BridgeResult<bool> {
        let obj = self.guest_id()?;
        self.bridge.guest_call(|g| g.hasattr(obj, key))
    }

    fn evict(&self, key: &str) {
        let cache = Rc::clone(&self.shared.borrow().cache);
        cache.borrow_mut().entries.remove(key);
    }

    // ---- elements ----

    /// `Ok(None)` means the key is absent.
    pub fn get_item(&self, key: GuestId) -> BridgeResult<Option<Self>> {
        let obj = self.require(Capabilities::GETITEM, "element lookup")?;
        let fetched = self.bridge.guest_call(|g| g.get_item(obj, key))?;
        Ok(fetched.map(|owned| self.adopt(owned)))
    }

    pub fn set_item(&self, key: GuestId, value: GuestId) -> BridgeResult<()> {
        let obj = self.require(Capabilities::SETITEM, "element assignment")?;
        self.bridge.guest_call(|g| g.set_item(obj, key, value))
    }

    pub fn del_item(&self, key: GuestId) -> BridgeResult<()> {
        let obj = self.require(Capabilities::DELITEM, "element deletion")?;
        self.bridge.guest_call(|g| g.del_item(obj, key))
    }

    pub fn contains(&self, key: GuestId) -> BridgeResult<bool> {
        let obj = self.require(Capabilities::CONTAINS, "membership test")?;
        self.bridge.guest_call(|g| g.contains(obj, key))
    }

    pub fn length(&self) -> BridgeResult<usize> {
        let obj = self.require(Capabilities::LENGTHFUL, "length")?;
        self.bridge.guest_call(|g| g.length(obj))
    }

    // ---- calls ----

    /// Call the wrapped callable. Bound arguments (from [`bind`](Self::bind))
    /// are prepended to `args`.
    pub fn call(&self, args: &[GuestId], kwargs: &[(&str, GuestId)]) -> BridgeResult<Self> {
        if self.props.capture_caller {
            let obj = self.guest_id()?;
            return Err(BridgeError::Unsupported {
                op: "call without a caller on a caller-capturing wrapper",
                type_name: self.bridge.guest.type_name(obj),
            });
        }
        self.call_inner(None, args, kwargs)
    }

    /// Like [`call`](Self::call), additionally supplying the calling object.
    /// Only caller-capturing aliases forward it; others ignore it.
    pub fn call_with_caller(
        &self,
        caller: GuestId,
        args: &[GuestId],
        kwargs: &[(&str, GuestId)],
    ) -> BridgeResult<Self> {
        self.call_inner(Some(caller), args, kwargs)
    }

    fn call_inner(
        &self,
        caller: Option<GuestId>,
        args: &[GuestId],
        kwargs: &[(&str, GuestId)],
    ) -> BridgeResult<Self> {
        let obj = self.require(Capabilities::CALLABLE, "call")?;
        let mut full: Vec<GuestId> = Vec::new();
        if self.props.capture_caller {
            if let Some(caller) = caller {
                full.push(caller);
            }
        }
        if let Some(bound) = &self.props.bound {
            full.extend_from_slice(&bound.args);
        }
        full.extend_from_slice(args);
        let owned = self.bridge.guest_call(|g| g.call(obj, &full, kwargs))?;
        Ok(self.adopt(owned))
    }

    /// An alias that prepends `args` to every call. The alias takes its own
    /// guest reference on each bound argument, released when the last alias
    /// holding them drops.
    pub fn bind(&self, args: &[GuestId]) -> BridgeResult<Self> {
        self.require(Capabilities::CALLABLE, "bind")?;
        let mut all: Vec<GuestId> = Vec::new();
        if let Some(bound) = &self.props.bound {
            all.extend_from_slice(&bound.args);
        }
        all.extend_from_slice(args);
        for &arg in &all {
            self.bridge.guest.incref(arg);
        }
        let mut alias = self.clone();
        alias.props.bound = Some(Rc::new(BoundArgs {
            bridge: Rc::clone(&self.bridge),
            args: all,
        }));
        Ok(alias)
    }

    /// An alias that passes the calling object as the first argument when
    /// invoked through [`call_with_caller`](Self::call_with_caller).
    pub fn capture_caller(&self) -> BridgeResult<Self> {
        self.require(Capabilities::CALLABLE, "capture_caller")?;
        let mut alias = self.clone();
        alias.props.capture_caller = true;
        Ok(alias)
    }

    // ---- iteration ----

    /// A single-shot iterator over the wrapped iterable. The underlying
    /// guest iterator wrapper is destroyed on exhaustion.
    pub fn try_iter(&self) -> BridgeResult<ProxyIterator<G, V>> {
        let obj = self.require(Capabilities::ITERABLE, "iteration")?;
        let owned = self.bridge.guest_call(|g| g.iterator(obj))?;
        Ok(ProxyIterator {
            proxy: self.adopt(owned),
            done: false,
        })
    }

    // ---- futures ----

    /// Resolve the wrapped awaitable to a wrapper around its guest future.
    ///
    /// The future is cached on the group, so awaiting the same wrapper (or
    /// any alias) again observes the same resolution instead of re-running
    /// the guest's await protocol.
    pub fn resolve_future(&self) -> BridgeResult<Self> {
        let obj = self.require(Capabilities::AWAITABLE, "await")?;
        let cached = self.shared.borrow().pending_future;
        let future = match cached {
            Some(future) => future,
            None => {
                let future = self.bridge.guest_call(|g| g.as_future(obj))?;
                self.shared.borrow_mut().pending_future = Some(future);
                future
            }
        };
        Ok(Self::construct(
            &self.bridge,
            future,
            None,
            self.bridge.config.register_finalizers,
            ProxyProps::plain(),
        ))
    }
}

/// Iterator adapter over a guest iterator wrapper.
pub struct ProxyIterator<G: GuestRuntime, V: HostValue> {
    proxy: Proxy<G, V>,
    done: bool,
}

impl<G: GuestRuntime, V: HostValue> Iterator for ProxyIterator<G, V> {
    type Item = BridgeResult<Proxy<G, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let iter = match self.proxy.guest_id() {
            Ok(iter) => iter,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        match self.proxy.bridge.guest_call(|g| g.iter_next(iter)) {
            Ok(Some(owned)) => Some(Ok(self.proxy.adopt(owned))),
            Ok(None) => {
                self.done = true;
                let _ = self.proxy.destroy(None);
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Tear down one wrapper group. Idempotent; safe against reentrant use of
/// aliases during teardown because the guest reference is detached before
/// any boundary call is made.
pub(crate) fn destroy_shared<G: GuestRuntime, V: HostValue>(
    bridge: &Rc<BridgeInner<G, V>>,
    shared: &SharedRef<G, V>,
    message: Option<&str>,
    diagnostics: bool,
) {
    let taken = {
        let mut s = shared.borrow_mut();
        s.handle
            .take()
            .map(|obj| (obj, s.pending_future.take(), s.registered))
    };
    let Some((obj, pending, registered)) = taken else {
        return;
    };

    let mut msg = message.unwrap_or(DESTROYED_MSG).to_string();
    if diagnostics {
        let ty = bridge.guest.type_name(obj);
        msg.push_str(&format!("\nThe object was of type \"{ty}\" and "));
        match bridge.guest.repr(obj) {
            Ok(repr) => msg.push_str(&format!("had repr \"{repr}\"")),
            Err(_) => msg.push_str("an error was raised when trying to generate its repr"),
        }
    }
    {
        let mut s = shared.borrow_mut();
        s.destroyed_msg = Some(msg);
        s.registered = false;
    }
    if registered {
        bridge.registry.unregister(shared);
    }

    let cache = Rc::clone(&shared.borrow().cache);
    decref_cache(bridge, &cache);
    if let Some(future) = pending {
        bridge.guest.decref(future);
    }
    bridge.guest.decref(obj);
}

/// Finalizer-backstop variant of teardown: marks the cache leaked so cached
/// children of unknown liveness are left to their own finalizer entries.
pub(crate) fn finalize_shared<G: GuestRuntime, V: HostValue>(
    bridge: &Rc<BridgeInner<G, V>>,
    shared: &SharedRef<G, V>,
) {
    let taken = {
        let mut s = shared.borrow_mut();
        s.handle
            .take()
            .map(|obj| (obj, s.pending_future.take()))
    };
    let Some((obj, pending)) = taken else {
        return;
    };
    {
        let mut s = shared.borrow_mut();
        s.destroyed_msg = Some(LEAKED_MSG.to_string());
        s.registered = false;
    }

    let cache = Rc::clone(&shared.borrow().cache);
    cache.borrow_mut().leaked = true;
    decref_cache(bridge, &cache);
    if let Some(future) = pending {
        bridge.guest.decref(future);
    }
    bridge.guest.decref(obj);
    log::warn!("finalizer backstop reclaimed a wrapper for guest object {obj:?} that was dropped without destroy()");
}

fn decref_cache<G: GuestRuntime, V: HostValue>(
    bridge: &Rc<BridgeInner<G, V>>,
    cache: &CacheRef<G, V>,
) {
    let (entries, leaked) = {
        let mut c = cache.borrow_mut();
        c.refcount -= 1;
        if c.refcount != 0 {
            return;
        }
        (std::mem::take(&mut c.entries), c.leaked)
    };
    if leaked {
        // Dropping the map drops our aliases of the children; their own
        // finalizer entries reclaim them on a later sweep.
        drop(entries);
        return;
    }
    for child in entries.into_values() {
        destroy_shared(bridge, &child.shared, Some(CACHE_DESTROYED_MSG), false);
    }
}
