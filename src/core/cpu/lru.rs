// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Arena-backed LRU map
//!
//! Entries live in a fixed-capacity slot arena. An index map finds the slot
//! for an address, and an intrusive doubly-linked list of slot indices keeps
//! recency order (head = most recent, tail = least recent). All operations
//! are O(1) except the range scans.
//!
//! # Example
//!
//! ```
//! use corvid::core::cpu::lru::LruCache;
//!
//! let mut cache = LruCache::new(2);
//! cache.insert(0x10, 'a');
//! cache.insert(0x20, 'b');
//! cache.get(0x10); // 0x10 is now most recent
//!
//! let evicted = cache.insert(0x30, 'c');
//! assert_eq!(evicted, Some((0x20, 'b')));
//! ```

use std::collections::HashMap;

const NIL: usize = usize::MAX;

struct Slot<V> {
    key: u32,
    value: V,
    prev: usize,
    next: usize,
}

/// Fixed-capacity LRU map keyed by address
///
/// The arena stays dense: removing an entry moves the last slot into the
/// hole and relinks it.
pub struct LruCache<V> {
    slots: Vec<Slot<V>>,
    index: HashMap<u32, usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<V> LruCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn contains(&self, key: u32) -> bool {
        self.index.contains_key(&key)
    }

    fn unlink(&mut self, at: usize) {
        let Slot { prev, next, .. } = self.slots[at];
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
    }

    fn push_front(&mut self, at: usize) {
        let head = self.head;
        self.slots[at].prev = NIL;
        self.slots[at].next = head;
        if head == NIL {
            self.tail = at;
        } else {
            self.slots[head].prev = at;
        }
        self.head = at;
    }

    fn touch(&mut self, at: usize) {
        if self.head != at {
            self.unlink(at);
            self.push_front(at);
        }
    }

    /// Look up `key` and mark it most recently used
    pub fn get(&mut self, key: u32) -> Option<&V> {
        let at = *self.index.get(&key)?;
        self.touch(at);
        Some(&self.slots[at].value)
    }

    /// Mutable lookup; marks the entry most recently used
    pub fn get_mut(&mut self, key: u32) -> Option<&mut V> {
        let at = *self.index.get(&key)?;
        self.touch(at);
        Some(&mut self.slots[at].value)
    }

    /// Look up `key` without changing recency
    pub fn peek(&self, key: u32) -> Option<&V> {
        self.index.get(&key).map(|&at| &self.slots[at].value)
    }

    /// Insert or replace `key`, making it most recently used
    ///
    /// When a new key arrives at capacity the least recently used entry is
    /// removed and returned.
    pub fn insert(&mut self, key: u32, value: V) -> Option<(u32, V)> {
        if let Some(&at) = self.index.get(&key) {
            self.slots[at].value = value;
            self.touch(at);
            return None;
        }

        let evicted = if self.is_full() { self.pop_lru() } else { None };

        self.slots.push(Slot {
            key,
            value,
            prev: NIL,
            next: NIL,
        });
        let at = self.slots.len() - 1;
        self.index.insert(key, at);
        self.push_front(at);
        evicted
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(u32, V)> {
        if self.tail == NIL {
            return None;
        }
        let key = self.slots[self.tail].key;
        self.remove(key).map(|value| (key, value))
    }

    /// Remove `key`
    pub fn remove(&mut self, key: u32) -> Option<V> {
        let at = self.index.remove(&key)?;
        self.unlink(at);

        let last = self.slots.len() - 1;
        let removed = self.slots.swap_remove(at);
        if at != last {
            // The former last slot now lives at `at`
            let Slot { key: moved, prev, next, .. } = self.slots[at];
            if prev == NIL {
                self.head = at;
            } else {
                self.slots[prev].next = at;
            }
            if next == NIL {
                self.tail = at;
            } else {
                self.slots[next].prev = at;
            }
            self.index.insert(moved, at);
        }
        Some(removed.value)
    }

    /// Keys for which `predicate` holds, most recent first
    pub fn keys_where(&self, mut predicate: impl FnMut(u32, &V) -> bool) -> Vec<u32> {
        let mut keys = Vec::new();
        let mut at = self.head;
        while at != NIL {
            let slot = &self.slots[at];
            if predicate(slot.key, &slot.value) {
                keys.push(slot.key);
            }
            at = slot.next;
        }
        keys
    }

    /// Visit every entry mutably, most recent first
    pub fn for_each_mut(&mut self, mut f: impl FnMut(u32, &mut V)) {
        let mut at = self.head;
        while at != NIL {
            let slot = &mut self.slots[at];
            f(slot.key, &mut slot.value);
            at = slot.next;
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}
