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

//! Data cache
//!
//! Per-core write-back LRU of 16-bit data words keyed by physical address.
//!
//! Protection is checked on the cold path only: a read miss goes through a
//! normal (non-privileged) memory read, and the first write to an absent or
//! clean entry checks alignment and the page's `WRITE` flag. Write-back of
//! dirty entries is therefore privileged.
//!
//! Caches are private to their core. Memory written by one core becomes
//! visible to others only after write-back (eviction, `flush`,
//! `remove_page_references` or `release`).

use super::lru::LruCache;
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::{page_index, MemoryController, PageFlags, WriteMode};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheEntry {
    dirty: bool,
    value: u16,
}

/// Write-back cache of 16-bit words
pub struct DataCache {
    entries: LruCache<CacheEntry>,
    memory: Arc<MemoryController>,
    evictions: u64,
}

impl DataCache {
    pub fn new(memory: Arc<MemoryController>, capacity: usize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            memory,
            evictions: 0,
        }
    }

    fn write_back(&self, address: u32, value: u16) -> Result<()> {
        self.memory.write_u16(address, value, WriteMode::PRIVILEGED)
    }

    /// Make room for one new entry, writing back the victim if dirty
    fn make_space(&mut self) -> Result<()> {
        if !self.entries.is_full() {
            return Ok(());
        }
        if let Some((address, entry)) = self.entries.pop_lru() {
            self.evictions += 1;
            if entry.dirty {
                log::trace!("dcache evict 0x{:06X} (dirty)", address);
                self.write_back(address, entry.value)?;
            }
        }
        Ok(())
    }

    /// Read the word at `address`
    pub fn read_u16(&mut self, address: u32) -> Result<u16> {
        if let Some(entry) = self.entries.get(address) {
            return Ok(entry.value);
        }

        let value = self.memory.read_u16(address, false)?;
        self.make_space()?;
        self.entries.insert(
            address,
            CacheEntry {
                dirty: false,
                value,
            },
        );
        Ok(value)
    }

    /// Write the word at `address`; memory is updated on write-back
    pub fn write_u16(&mut self, address: u32, value: u16) -> Result<()> {
        if let Some(entry) = self.entries.get_mut(address) {
            if entry.dirty {
                entry.value = value;
                return Ok(());
            }
        }

        // Absent or clean: validate once so write-back can be privileged
        if address % 2 != 0 {
            return Err(EmulatorError::MisalignedAccess { address, size: 2 });
        }
        self.memory.check_access(address, PageFlags::WRITE, false)?;

        if let Some(entry) = self.entries.get_mut(address) {
            *entry = CacheEntry { dirty: true, value };
            return Ok(());
        }
        self.make_space()?;
        self.entries
            .insert(address, CacheEntry { dirty: true, value });
        Ok(())
    }

    /// Drop every entry inside page `page`
    ///
    /// Dirty entries are written back first unless `writeback` is false, for
    /// pages whose content is about to be discarded.
    pub fn remove_page_references(&mut self, page: u32, writeback: bool) -> Result<()> {
        let addresses = self
            .entries
            .keys_where(|address, _| page_index(address) == page);
        for address in addresses {
            if let Some(entry) = self.entries.remove(address) {
                if entry.dirty && writeback {
                    self.write_back(address, entry.value)?;
                }
            }
        }
        Ok(())
    }

    /// Write back every dirty entry, keeping them cached
    pub fn flush(&mut self) -> Result<()> {
        let dirty = self.entries.keys_where(|_, entry| entry.dirty);
        for address in dirty {
            if let Some(&entry) = self.entries.peek(address) {
                self.write_back(address, entry.value)?;
            }
            if let Some(entry) = self.entries.get_mut(address) {
                entry.dirty = false;
            }
        }
        Ok(())
    }

    /// Write back and drop the word at `address`
    ///
    /// Called before byte and compare-and-swap accesses that bypass the
    /// cache, so they see this core's latest value.
    pub fn release(&mut self, address: u32) -> Result<()> {
        if let Some(entry) = self.entries.remove(address) {
            if entry.dirty {
                self.write_back(address, entry.value)?;
            }
        }
        Ok(())
    }

    /// Drop every entry without writing anything back
    pub fn discard(&mut self) {
        self.entries.clear();
    }

    /// Whether `address` is cached with unwritten changes
    pub fn is_dirty(&self, address: u32) -> bool {
        self.entries.peek(address).is_some_and(|entry| entry.dirty)
    }

    pub fn contains(&self, address: u32) -> bool {
        self.entries.contains(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries evicted to make space
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
