//! Shared test fixtures: an in-memory guest interpreter with a strict
//! refcount ledger, and a host value type.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use tether::prelude::*;

/// Route `log` output (finalizer warnings, invalid-handle reports) into the
/// test capture. Idempotent across tests in one binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Debug)]
pub enum HostVal {
    Str(Rc<str>),
    Failure(Rc<HostFailure>),
    Guest(GuestId),
}

impl HostVal {
    pub fn str(s: &str) -> Self {
        HostVal::Str(Rc::from(s))
    }
}

impl HostValue for HostVal {
    fn object_id(&self) -> ObjectId {
        match self {
            HostVal::Str(s) => ObjectId(Rc::as_ptr(s) as *const u8 as u64),
            HostVal::Failure(f) => ObjectId(Rc::as_ptr(f) as *const u8 as u64),
            HostVal::Guest(id) => ObjectId(0x8000_0000_0000_0000 | id.0),
        }
    }

    fn wrap_failure(failure: &HostFailure) -> Self {
        HostVal::Failure(Rc::new(failure.clone()))
    }

    fn as_guest(&self) -> Option<GuestId> {
        match self {
            HostVal::Guest(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Default)]
struct GuestObject {
    refs: i64,
    type_name: String,
    caps: Capabilities,
    repr: Option<String>,
    repr_raises: bool,
    attrs: FxHashMap<String, GuestId>,
    items: FxHashMap<GuestId, GuestId>,
    len: Option<usize>,
    call_result: Option<GuestId>,
    call_raises: Option<GuestError>,
    /// When a call raises, also record the error on the indicator first,
    /// the way a real interpreter does.
    raise_sets_indicator: bool,
    iter_items: VecDeque<GuestId>,
}

#[derive(Default)]
struct GuestState {
    next_id: u64,
    objects: FxHashMap<GuestId, GuestObject>,
    pending: Option<GuestError>,
    host_errors: Vec<(Handle, String, Vec<TracebackFrame>)>,
    calls: Vec<(GuestId, Vec<GuestId>, Vec<(String, GuestId)>)>,
    attr_fetches: usize,
    future_calls: usize,
    underflow: bool,
}

impl GuestState {
    fn alloc(&mut self, type_name: &str, caps: Capabilities) -> GuestId {
        self.next_id += 1;
        let id = GuestId(self.next_id);
        self.objects.insert(
            id,
            GuestObject {
                refs: 1,
                type_name: type_name.to_string(),
                caps,
                ..GuestObject::default()
            },
        );
        id
    }

    fn obj(&self, id: GuestId) -> &GuestObject {
        self.objects.get(&id).expect("use of freed guest object")
    }

    fn obj_mut(&mut self, id: GuestId) -> &mut GuestObject {
        self.objects.get_mut(&id).expect("use of freed guest object")
    }

    fn incref(&mut self, id: GuestId) {
        self.obj_mut(id).refs += 1;
    }

    fn decref(&mut self, id: GuestId) {
        let Some(obj) = self.objects.get_mut(&id) else {
            self.underflow = true;
            return;
        };
        obj.refs -= 1;
        if obj.refs < 0 {
            self.underflow = true;
        }
        if obj.refs <= 0 {
            let obj = self.objects.remove(&id).unwrap();
            for (_, v) in obj.attrs {
                self.decref(v);
            }
            for (_, v) in obj.items {
                self.decref(v);
            }
            for v in obj.iter_items {
                self.decref(v);
            }
        }
    }
}

/// A fake reference-counted interpreter. Every reference the bridge takes or
/// releases moves a ledger the tests can audit.
#[derive(Clone, Default)]
pub struct MockGuest {
    state: Rc<RefCell<GuestState>>,
}

impl MockGuest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a guest object; the returned id carries the test's own
    /// reference, so a wrapped-then-destroyed object ends back at 1.
    pub fn make_object(&self, type_name: &str, caps: Capabilities) -> GuestId {
        self.state.borrow_mut().alloc(type_name, caps)
    }

    pub fn refcount(&self, id: GuestId) -> i64 {
        self.state.borrow().objects.get(&id).map_or(0, |o| o.refs)
    }

    pub fn is_live(&self, id: GuestId) -> bool {
        self.state.borrow().objects.contains_key(&id)
    }

    pub fn underflowed(&self) -> bool {
        self.state.borrow().underflow
    }

    pub fn set_repr(&self, id: GuestId, repr: &str) {
        self.state.borrow_mut().obj_mut(id).repr = Some(repr.to_string());
    }

    pub fn set_repr_raises(&self, id: GuestId) {
        self.state.borrow_mut().obj_mut(id).repr_raises = true;
    }

    /// Store an attribute; the attribute table owns one reference to the
    /// value, like a real interpreter's instance dict.
    pub fn put_attr(&self, obj: GuestId, key: &str, value: GuestId) {
        let mut state = self.state.borrow_mut();
        state.incref(value);
        if let Some(old) = state.obj_mut(obj).attrs.insert(key.to_string(), value) {
            state.decref(old);
        }
    }

    pub fn put_item(&self, obj: GuestId, key: GuestId, value: GuestId) {
        let mut state = self.state.borrow_mut();
        state.incref(value);
        if let Some(old) = state.obj_mut(obj).items.insert(key, value) {
            state.decref(old);
        }
    }

    pub fn set_len(&self, obj: GuestId, len: usize) {
        self.state.borrow_mut().obj_mut(obj).len = Some(len);
    }

    pub fn set_call_result(&self, obj: GuestId, result: GuestId) {
        self.state.borrow_mut().obj_mut(obj).call_result = Some(result);
    }

    pub fn set_call_raises(&self, obj: GuestId, error: GuestError, sets_indicator: bool) {
        let mut state = self.state.borrow_mut();
        let o = state.obj_mut(obj);
        o.call_raises = Some(error);
        o.raise_sets_indicator = sets_indicator;
    }

    pub fn push_iter_item(&self, obj: GuestId, item: GuestId) {
        let mut state = self.state.borrow_mut();
        state.incref(item);
        state.obj_mut(obj).iter_items.push_back(item);
    }

    pub fn attr_fetches(&self) -> usize {
        self.state.borrow().attr_fetches
    }

    pub fn future_calls(&self) -> usize {
        self.state.borrow().future_calls
    }

    pub fn calls(&self) -> Vec<(GuestId, Vec<GuestId>, Vec<(String, GuestId)>)> {
        self.state.borrow().calls.clone()
    }

    pub fn host_errors(&self) -> Vec<(Handle, String, Vec<TracebackFrame>)> {
        self.state.borrow().host_errors.clone()
    }
}

impl GuestRuntime for MockGuest {
    fn incref(&self, obj: GuestId) {
        self.state.borrow_mut().incref(obj);
    }

    fn decref(&self, obj: GuestId) {
        self.state.borrow_mut().decref(obj);
    }

    fn capabilities(&self, obj: GuestId) -> Capabilities {
        self.state.borrow().obj(obj).caps
    }

    fn type_name(&self, obj: GuestId) -> String {
        self.state.borrow().obj(obj).type_name.clone()
    }

    fn repr(&self, obj: GuestId) -> Result<String, GuestError> {
        let state = self.state.borrow();
        let o = state.obj(obj);
        if o.repr_raises {
            return Err(GuestError::new("ReprError", "repr failed"));
        }
        Ok(o.repr
            .clone()
            .unwrap_or_else(|| format!("<{} #{}>", o.type_name, obj.0)))
    }

    fn getattr(&self, obj: GuestId, key: &str) -> Result<Option<GuestId>, GuestError> {
        let mut state = self.state.borrow_mut();
        state.attr_fetches += 1;
        if key.starts_with("raising_") {
            return Err(GuestError::new("RuntimeError", "attribute machinery failed"));
        }
        match state.obj(obj).attrs.get(key).copied() {
            Some(value) => {
                state.incref(value);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn setattr(&self, obj: GuestId, key: &str, value: GuestId) -> Result<(), GuestError> {
        let mut state = self.state.borrow_mut();
        state.incref(value);
        if let Some(old) = state.obj_mut(obj).attrs.insert(key.to_string(), value) {
            state.decref(old);
        }
        Ok(())
    }

    fn delattr(&self, obj: GuestId, key: &str) -> Result<(), GuestError> {
        let mut state = self.state.borrow_mut();
        match state.obj_mut(obj).attrs.remove(key) {
            Some(old) => {
                state.decref(old);
                Ok(())
            }
            None => Err(GuestError::new("AttributeError", key)),
        }
    }

    fn hasattr(&self, obj: GuestId, key: &str) -> Result<bool, GuestError> {
        Ok(self.state.borrow().obj(obj).attrs.contains_key(key))
    }

    fn get_item(&self, obj: GuestId, key: GuestId) -> Result<Option<GuestId>, GuestError> {
        let mut state = self.state.borrow_mut();
        match state.obj(obj).items.get(&key).copied() {
            Some(value) => {
                state.incref(value);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_item(&self, obj: GuestId, key: GuestId, value: GuestId) -> Result<(), GuestError> {
        let mut state = self.state.borrow_mut();
        state.incref(value);
        if let Some(old) = state.obj_mut(obj).items.insert(key, value) {
            state.decref(old);
        }
        Ok(())
    }

    fn del_item(&self, obj: GuestId, key: GuestId) -> Result<(), GuestError> {
        let mut state = self.state.borrow_mut();
        match state.obj_mut(obj).items.remove(&key) {
            Some(old) => {
                state.decref(old);
                Ok(())
            }
            None => Err(GuestError::new("KeyError", "missing key")),
        }
    }

    fn contains(&self, obj: GuestId, key: GuestId) -> Result<bool, GuestError> {
        Ok(self.state.borrow().obj(obj).items.contains_key(&key))
    }

    fn length(&self, obj: GuestId) -> Result<usize, GuestError> {
        self.state
            .borrow()
            .obj(obj)
            .len
            .ok_or_else(|| GuestError::new("TypeError", "object has no length"))
    }

    fn call(
        &self,
        obj: GuestId,
        args: &[GuestId],
        kwargs: &[(&str, GuestId)],
    ) -> Result<GuestId, GuestError> {
        let mut state = self.state.borrow_mut();
        let kwargs_owned: Vec<(String, GuestId)> = kwargs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        state.calls.push((obj, args.to_vec(), kwargs_owned));
        if let Some(err) = state.obj(obj).call_raises.clone() {
            if state.obj(obj).raise_sets_indicator {
                state.pending = Some(err.clone());
            }
            return Err(err);
        }
        match state.obj(obj).call_result {
            Some(result) => {
                state.incref(result);
                Ok(result)
            }
            None => Ok(state.alloc("result", Capabilities::empty())),
        }
    }

    fn iterator(&self, obj: GuestId) -> Result<GuestId, GuestError> {
        let mut state = self.state.borrow_mut();
        let items = state.obj(obj).iter_items.clone();
        for &item in &items {
            state.incref(item);
        }
        let iter = state.alloc("iterator", Capabilities::empty());
        state.obj_mut(iter).iter_items = items;
        Ok(iter)
    }

    fn iter_next(&self, iter: GuestId) -> Result<Option<GuestId>, GuestError> {
        // The popped item's reference transfers from the iterator to the
        // caller.
        Ok(self.state.borrow_mut().obj_mut(iter).iter_items.pop_front())
    }

    fn as_future(&self, _obj: GuestId) -> Result<GuestId, GuestError> {
        let mut state = self.state.borrow_mut();
        state.future_calls += 1;
        Ok(state.alloc("future", Capabilities::empty()))
    }

    fn error_pending(&self) -> bool {
        self.state.borrow().pending.is_some()
    }

    fn take_pending_error(&self) -> Option<GuestError> {
        self.state.borrow_mut().pending.take()
    }

    fn set_pending_error(&self, error: GuestError) {
        self.state.borrow_mut().pending = Some(error);
    }

    fn set_host_error(&self, error: Handle, message: &str, frames: &[TracebackFrame]) {
        let mut state = self.state.borrow_mut();
        state
            .host_errors
            .push((error, message.to_string(), frames.to_vec()));
        state.pending = Some(GuestError::new("HostError", message));
    }
}
