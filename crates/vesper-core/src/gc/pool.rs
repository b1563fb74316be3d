//! Typed object arenas — an ownership-strict-language substitute for the
//! intrusive "all objects" linked list spec.md §3/§9 describes.
//!
//! Grounded on the teacher's `gc/object_pool.rs` ("Object Pool V2"): a
//! `Vec<Option<T>>` plus a free-list of holes gives O(1) allocation and
//! O(1) slot reuse without raw pointers or `Rc`/`RefCell`. IDs are small
//! `u32`-wrapped indices, embeddable directly inside [`crate::value::Value`].

use crate::gc::header::{Color, GcHeader};

macro_rules! object_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

object_id!(StringId);
object_id!(TableId);
object_id!(FunctionId);
object_id!(UpvalueId);
object_id!(UserdataId);

/// A single arena for one object kind. Holds the GC header alongside the
/// payload so mark/sweep never has to look the object up twice.
pub struct Pool<T> {
    slots: Vec<Option<(GcHeader, T)>>,
    free: Vec<u32>,
    /// Slots of objects freed during the last sweep, kept for cheap
    /// reuse (spec §4.5 "reuse pools"), capped to bound memory held idle.
    reuse_cap: usize,
    pub reuse_hits: u64,
    pub reuse_misses: u64,
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Pool {
            slots: Vec::new(),
            free: Vec::new(),
            reuse_cap: 64,
            reuse_hits: 0,
            reuse_misses: 0,
        }
    }

    pub fn insert(&mut self, white: Color, value: T) -> u32 {
        let header = GcHeader::new(white);
        if let Some(idx) = self.free.pop() {
            self.reuse_hits += 1;
            self.slots[idx as usize] = Some((header, value));
            idx
        } else {
            self.reuse_misses += 1;
            let idx = self.slots.len() as u32;
            self.slots.push(Some((header, value)));
            idx
        }
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize)?.as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(id as usize)?.as_mut().map(|(_, v)| v)
    }

    pub fn header(&self, id: u32) -> Option<&GcHeader> {
        self.slots.get(id as usize)?.as_ref().map(|(h, _)| h)
    }

    pub fn header_mut(&mut self, id: u32) -> Option<&mut GcHeader> {
        self.slots.get_mut(id as usize)?.as_mut().map(|(h, _)| h)
    }

    /// Free a slot. Kept in the free-list (capped) for reuse; beyond the
    /// cap the slot is dropped and its index lost (arena only grows).
    pub fn free_slot(&mut self, id: u32) -> Option<T> {
        let entry = self.slots.get_mut(id as usize)?.take();
        if self.free.len() < self.reuse_cap {
            self.free.push(id);
        }
        entry.map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All live (non-freed) ids, used by sweep.
    pub fn live_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as u32))
    }

    /// If the pool-miss rate indicates thrashing, grow the reuse cap
    /// (spec §4.5: "if the pool-miss rate indicates thrashing, the pool
    /// cap grows").
    pub fn maybe_grow_cap(&mut self) {
        let total = self.reuse_hits + self.reuse_misses;
        if total > 256 && self.reuse_misses * 2 > total {
            self.reuse_cap = (self.reuse_cap * 2).min(4096);
            self.reuse_hits = 0;
            self.reuse_misses = 0;
        }
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
