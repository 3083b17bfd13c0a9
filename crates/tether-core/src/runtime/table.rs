//! Generational handle table for host values observed by the guest.

use rustc_hash::FxHashMap;

use crate::error::{self, InvalidHandle};
use crate::types::{HostValue, ObjectId};

use super::Handle;

/// Registry that issues, validates, and recycles handles for host values.
///
/// Three reference classes are kept side by side:
///
/// - heap slots with a refcount and a generation (long-lived, shared);
/// - a LIFO stack frame for temporaries of one boundary call;
/// - an immortal table deduplicated by host identity.
///
/// Stale heap handles are detected by comparing the handle's generation with
/// the slot's current one, which is bumped every time a slot is freed.
pub struct HandleTable<V: HostValue> {
    slots: Vec<Slot<V>>,
    free_head: Option<u32>,
    stack: Vec<V>,
    immortals: Vec<V>,
    interned: FxHashMap<ObjectId, u32>,
    live: usize,
    chunk: usize,
}

struct Slot<V> {
    generation: u32,
    entry: Entry<V>,
}

// A free slot reuses the refcount's storage for its free-list link, so the
// free list can never alias a live refcount.
enum Entry<V> {
    Occupied { value: V, refcount: u32 },
    Free { next: Option<u32> },
}

/// The stack-class frame of one suspended boundary call, detached with
/// [`HandleTable::save_stack_frame`]. Opaque to the continuation machinery
/// that carries it.
pub struct StackFrame<V> {
    base: usize,
    values: Vec<V>,
}

impl<V> StackFrame<V> {
    /// Stack depth this frame was detached at and must be restored at.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

const DEFAULT_CHUNK: usize = 64;

impl<V: HostValue> HandleTable<V> {
    pub fn new() -> Self {
        Self::with_chunk(DEFAULT_CHUNK)
    }

    /// Create a table whose slot array grows by `chunk` slots at a time.
    pub fn with_chunk(chunk: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            stack: Vec::new(),
            immortals: Vec::new(),
            interned: FxHashMap::default(),
            live: 0,
            chunk: chunk.max(1),
        }
    }

    /// Number of currently occupied heap slots. Leak checks compare this
    /// before and after a scenario.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Current depth of the stack-class frame.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Allocate a heap-class handle with refcount 1.
    ///
    /// The returned handle is unique among all currently-valid handles.
    pub fn new_value(&mut self, value: V) -> Handle {
        let index = match self.free_head {
            Some(index) => index,
            None => self.grow(),
        };
        let slot = &mut self.slots[index as usize];
        let Entry::Free { next } = slot.entry else {
            error::mark_internal_fault();
            unreachable!("free list points at an occupied slot");
        };
        slot.entry = Entry::Occupied { value, refcount: 1 };
        self.free_head = next;
        self.live += 1;
        let handle = Handle::Heap {
            index,
            generation: slot.generation,
        };
        log::trace!("new_value -> {handle}");
        handle
    }

    /// Push a stack-class temporary, valid only until the current boundary
    /// call returns and only if released in LIFO order.
    pub fn new_stack(&mut self, value: V) -> Handle {
        let index = self.stack.len() as u32;
        self.stack.push(value);
        log::trace!("new_stack -> stack:{index}");
        Handle::Stack(index)
    }

    /// Intern a value for the process lifetime, deduplicated by identity:
    /// interning the same identity twice returns the same handle.
    pub fn intern(&mut self, value: V) -> Handle {
        let id = value.object_id();
        if let Some(&index) = self.interned.get(&id) {
            return Handle::Immortal(index);
        }
        let index = self.immortals.len() as u32;
        self.immortals.push(value);
        self.interned.insert(id, index);
        Handle::Immortal(index)
    }

    /// Resolve a handle to the value it names.
    pub fn get(&self, handle: Handle) -> Result<&V, InvalidHandle> {
        match handle {
            Handle::Immortal(index) => match self.immortals.get(index as usize) {
                Some(value) => Ok(value),
                None => invalid(InvalidHandle::ImmortalOutOfRange { index }),
            },
            Handle::Stack(index) => match self.stack.get(index as usize) {
                Some(value) => Ok(value),
                None => invalid(InvalidHandle::StackOutOfRange {
                    index,
                    depth: self.stack.len(),
                }),
            },
            Handle::Heap { index, generation } => {
                self.occupied(index, generation).map(|entry| match entry {
                    Entry::Occupied { value, .. } => value,
                    Entry::Free { .. } => unreachable!(),
                })
            }
        }
    }

    /// Take an additional reference.
    ///
    /// Immortal handles are returned unchanged. A stack handle is promoted to
    /// a fresh heap handle, since a second owner needs a lifetime that is not
    /// tied to call-stack depth. A heap handle has its refcount incremented
    /// and is returned unchanged.
    pub fn incref(&mut self, handle: Handle) -> Result<Handle, InvalidHandle> {
        match handle {
            Handle::Immortal(_) => Ok(handle),
            Handle::Stack(index) => {
                let value = match self.stack.get(index as usize) {
                    Some(value) => value.clone(),
                    None => {
                        return invalid(InvalidHandle::StackOutOfRange {
                            index,
                            depth: self.stack.len(),
                        });
                    }
                };
                Ok(self.new_value(value))
            }
            Handle::Heap { index, generation } => {
                match self.occupied_mut(index, generation)? {
                    Entry::Occupied { refcount, .. } => {
                        *refcount = refcount.saturating_add(1);
                    }
                    Entry::Free { .. } => unreachable!(),
                }
                Ok(handle)
            }
        }
    }

    /// Release one reference.
    ///
    /// Immortal handles are a no-op. A stack handle must be the current top
    /// of the frame. A heap handle whose refcount reaches zero has its slot
    /// cleared, its generation bumped, and the slot returned to the free
    /// list.
    pub fn decref(&mut self, handle: Handle) -> Result<(), InvalidHandle> {
        match handle {
            Handle::Immortal(_) => Ok(()),
            Handle::Stack(index) => {
                self.pop_stack_top(index)?;
                Ok(())
            }
            Handle::Heap { index, generation } => {
                match self.occupied_mut(index, generation)? {
                    Entry::Occupied { refcount, .. } => {
                        *refcount -= 1;
                        if *refcount == 0 {
                            self.release_slot(index);
                        }
                    }
                    Entry::Free { .. } => unreachable!(),
                }
                log::trace!("decref {handle}");
                Ok(())
            }
        }
    }

    /// `get` + `decref` in one step, for a handle whose ownership is being
    /// consumed exactly once.
    pub fn pop(&mut self, handle: Handle) -> Result<V, InvalidHandle> {
        match handle {
            Handle::Immortal(index) => match self.immortals.get(index as usize) {
                Some(value) => Ok(value.clone()),
                None => invalid(InvalidHandle::ImmortalOutOfRange { index }),
            },
            Handle::Stack(index) => self.pop_stack_top(index),
            Handle::Heap { index, generation } => {
                let refcount = match self.occupied(index, generation)? {
                    Entry::Occupied { refcount, .. } => *refcount,
                    Entry::Free { .. } => unreachable!(),
                };
                if refcount == 1 {
                    // Sole owner: move the value out instead of cloning.
                    // release_slot overwrites the placeholder free link.
                    let slot = &mut self.slots[index as usize];
                    let entry = std::mem::replace(&mut slot.entry, Entry::Free { next: None });
                    self.release_slot(index);
                    match entry {
                        Entry::Occupied { value, .. } => Ok(value),
                        Entry::Free { .. } => unreachable!(),
                    }
                } else {
                    let value = match self.occupied_mut(index, generation)? {
                        Entry::Occupied { value, refcount } => {
                            *refcount -= 1;
                            value.clone()
                        }
                        Entry::Free { .. } => unreachable!(),
                    };
                    Ok(value)
                }
            }
        }
    }

    /// Detach the stack-class frame above `base` so a suspending call can
    /// carry it as continuation state. Heap and immortal handles are
    /// unaffected by any number of suspend/resume cycles.
    pub fn save_stack_frame(&mut self, base: usize) -> Result<StackFrame<V>, InvalidHandle> {
        if base > self.stack.len() {
            return invalid(InvalidHandle::StackOutOfRange {
                index: base as u32,
                depth: self.stack.len(),
            });
        }
        let values = self.stack.split_off(base);
        Ok(StackFrame { base, values })
    }

    /// Reattach a previously saved frame. The current depth must equal the
    /// depth the frame was detached at, or every stack handle inside it
    /// would silently point at the wrong value.
    pub fn restore_stack_frame(&mut self, frame: StackFrame<V>) -> Result<(), InvalidHandle> {
        if self.stack.len() != frame.base {
            return invalid(InvalidHandle::FrameDepth {
                expected: frame.base,
                depth: self.stack.len(),
            });
        }
        self.stack.extend(frame.values);
        Ok(())
    }

    fn pop_stack_top(&mut self, index: u32) -> Result<V, InvalidHandle> {
        let depth = self.stack.len();
        if index as usize + 1 != depth {
            return invalid(InvalidHandle::StackOrder { index, depth });
        }
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => invalid(InvalidHandle::StackOrder { index, depth }),
        }
    }

    fn occupied(&self, index: u32, generation: u32) -> Result<&Entry<V>, InvalidHandle> {
        match self.slots.get(index as usize) {
            None => invalid(InvalidHandle::SlotOutOfRange { index }),
            Some(slot) => {
                if slot.generation != generation || matches!(slot.entry, Entry::Free { .. }) {
                    invalid(InvalidHandle::Stale { index, generation })
                } else {
                    Ok(&slot.entry)
                }
            }
        }
    }

    fn occupied_mut(&mut self, index: u32, generation: u32) -> Result<&mut Entry<V>, InvalidHandle> {
        match self.slots.get_mut(index as usize) {
            None => invalid(InvalidHandle::SlotOutOfRange { index }),
            Some(slot) => {
                if slot.generation != generation || matches!(slot.entry, Entry::Free { .. }) {
                    invalid(InvalidHandle::Stale { index, generation })
                } else {
                    Ok(&mut slot.entry)
                }
            }
        }
    }

    fn release_slot(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.entry = Entry::Free {
            next: self.free_head,
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free_head = Some(index);
        self.live -= 1;
    }

    // Extend the slot array by one chunk of linked free slots and return the
    // first new index. Amortizes allocation across many short-lived handles.
    fn grow(&mut self) -> u32 {
        let base = self.slots.len() as u32;
        let chunk = self.chunk as u32;
        for offset in 0..chunk {
            let next = if offset + 1 < chunk {
                Some(base + offset + 1)
            } else {
                self.free_head
            };
            self.slots.push(Slot {
                generation: 0,
                entry: Entry::Free { next },
            });
        }
        self.free_head = Some(base);
        base
    }
}

impl<V: HostValue> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: HostValue> std::fmt::Debug for HandleTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("slots", &self.slots.len())
            .field("live", &self.live)
            .field("stack_depth", &self.stack.len())
            .field("immortals", &self.immortals.len())
            .finish()
    }
}

fn invalid<T>(err: InvalidHandle) -> Result<T, InvalidHandle> {
    error::mark_internal_fault();
    log::error!("invalid handle: {err}");
    Err(err)
}
