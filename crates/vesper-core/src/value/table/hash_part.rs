//! Open-addressed hash part of a [`super::Table`] (spec §3, §4.2).
//!
//! Control-byte scheme grounded on `original_source/src/common/hash_map.hpp`:
//! one control byte per slot, `kEmpty`/`kDeleted` sentinels, the top 7 bits
//! of the full hash as a tag (`h2`), load factor 0.75, capacity a power of
//! two no smaller than 8, linear probing, rehash doubles capacity.

use crate::value::Value;
use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

const K_EMPTY: i8 = -128;
const K_DELETED: i8 = -2;
const K_LOAD_FACTOR: f64 = 0.75;
const K_MIN_CAPACITY: usize = 8;

fn h2(hash: u64) -> i8 {
    ((hash >> 57) & 0x7f) as i8
}

pub struct HashPart {
    ctrl: Vec<i8>,
    slots: Vec<Option<(Value, Value)>>,
    size: usize,
    hasher: RandomState,
}

impl HashPart {
    pub fn new() -> Self {
        HashPart {
            ctrl: Vec::new(),
            slots: Vec::new(),
            size: 0,
            hasher: RandomState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn hash_of(&self, key: &Value) -> u64 {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        h.finish()
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn ensure_capacity(&mut self) {
        if self.capacity() == 0 {
            self.grow_to(K_MIN_CAPACITY);
            return;
        }
        if (self.size + 1) as f64 > self.capacity() as f64 * K_LOAD_FACTOR {
            self.grow_to(self.capacity() * 2);
        }
    }

    fn grow_to(&mut self, new_cap: usize) {
        let new_cap = new_cap.max(K_MIN_CAPACITY).next_power_of_two();
        let old_slots = std::mem::replace(&mut self.slots, vec![None; new_cap]);
        self.ctrl = vec![K_EMPTY; new_cap];
        self.size = 0;
        for entry in old_slots.into_iter().flatten() {
            self.insert_fresh(entry.0, entry.1);
        }
    }

    /// Insert into an already-sized table assumed to have room; used by
    /// `grow_to` when rehashing, and by `insert` after `ensure_capacity`.
    fn insert_fresh(&mut self, key: Value, value: Value) {
        let hash = self.hash_of(&key);
        let tag = h2(hash);
        let cap = self.capacity();
        let mut idx = (hash as usize) & (cap - 1);
        loop {
            if self.ctrl[idx] == K_EMPTY || self.ctrl[idx] == K_DELETED {
                self.ctrl[idx] = tag;
                self.slots[idx] = Some((key, value));
                self.size += 1;
                return;
            }
            idx = (idx + 1) & (cap - 1);
        }
    }

    fn find_slot(&self, key: &Value) -> Option<usize> {
        if self.capacity() == 0 {
            return None;
        }
        let hash = self.hash_of(key);
        let tag = h2(hash);
        let cap = self.capacity();
        let mut idx = (hash as usize) & (cap - 1);
        let mut probes = 0;
        while probes < cap {
            match self.ctrl[idx] {
                K_EMPTY => return None,
                K_DELETED => {}
                t if t == tag => {
                    if let Some((k, _)) = &self.slots[idx] {
                        if k.raw_equal(key) {
                            return Some(idx);
                        }
                    }
                }
                _ => {}
            }
            idx = (idx + 1) & (cap - 1);
            probes += 1;
        }
        None
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        let idx = self.find_slot(key)?;
        self.slots[idx].as_ref().map(|(_, v)| v)
    }

    pub fn set(&mut self, key: Value, value: Value) {
        if value.is_nil() {
            self.remove(&key);
            return;
        }
        if let Some(idx) = self.find_slot(&key) {
            self.slots[idx] = Some((key, value));
            return;
        }
        self.ensure_capacity();
        self.insert_fresh(key, value);
    }

    pub fn remove(&mut self, key: &Value) {
        if let Some(idx) = self.find_slot(key) {
            self.ctrl[idx] = K_DELETED;
            self.slots[idx] = None;
            self.size -= 1;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.ctrl
            .iter()
            .zip(self.slots.iter())
            .filter(|(&c, _)| c != K_EMPTY && c != K_DELETED)
            .filter_map(|(_, s)| s.as_ref().map(|(k, v)| (k, v)))
    }

    /// `next(key)`: find `key`'s slot and return the following occupied
    /// slot, or `None` at the end (spec §4.2 `next`).
    pub fn next_after(&self, key: Option<&Value>) -> Option<(Value, Value)> {
        let start = match key {
            None => 0,
            Some(k) => self.find_slot(k)? + 1,
        };
        for idx in start..self.capacity() {
            let c = self.ctrl[idx];
            if c != K_EMPTY && c != K_DELETED {
                if let Some((k, v)) = &self.slots[idx] {
                    return Some((*k, *v));
                }
            }
        }
        None
    }

    pub fn byte_size(&self) -> usize {
        self.ctrl.len() + self.slots.len() * std::mem::size_of::<Option<(Value, Value)>>()
    }
}

impl Default for HashPart {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut h = HashPart::new();
        h.set(Value::Integer(100), Value::Integer(1));
        h.set(Value::Integer(200), Value::Integer(2));
        assert_eq!(h.get(&Value::Integer(100)), Some(&Value::Integer(1)));
        assert_eq!(h.get(&Value::Integer(200)), Some(&Value::Integer(2)));
        assert_eq!(h.get(&Value::Integer(300)), None);
    }

    #[test]
    fn nil_assignment_deletes() {
        let mut h = HashPart::new();
        h.set(Value::Integer(1), Value::Integer(1));
        h.set(Value::Integer(1), Value::Nil);
        assert_eq!(h.get(&Value::Integer(1)), None);
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn rehash_preserves_entries() {
        let mut h = HashPart::new();
        for i in 0..200i64 {
            h.set(Value::Integer(i), Value::Integer(i * 2));
        }
        for i in 0..200i64 {
            assert_eq!(h.get(&Value::Integer(i)), Some(&Value::Integer(i * 2)));
        }
    }
}
