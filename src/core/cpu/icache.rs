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

//! Instruction cache
//!
//! Per-core LRU map from physical code address to decoded instruction. A miss
//! checks that the page is executable, reads the word with a privileged
//! access and decodes it. Decoded instructions never change, so nothing is
//! ever written back.
//!
//! # Example
//!
//! ```
//! use corvid::core::cpu::icache::InstructionCache;
//! use corvid::core::cpu::decode::Instruction;
//! use corvid::core::memory::{MemoryController, PageFlags, WriteMode};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(MemoryController::new(0x20000).unwrap());
//! memory.write_u32(0x10000, 0, WriteMode::PRIVILEGED).unwrap();
//! memory.update_area_flags(0x10000, 4, PageFlags::EXECUTE, true).unwrap();
//!
//! let mut cache = InstructionCache::new(Arc::clone(&memory), 16);
//! assert_eq!(cache.fetch(0x10000).unwrap(), Instruction::Nop);
//! assert_eq!(cache.len(), 1);
//! ```

use super::decode::Instruction;
use super::lru::LruCache;
use crate::core::error::Result;
use crate::core::memory::{MemoryController, PageFlags};
use std::sync::Arc;

/// Decoded-instruction cache
pub struct InstructionCache {
    entries: LruCache<Instruction>,
    memory: Arc<MemoryController>,
    hits: u64,
    misses: u64,
}

impl InstructionCache {
    pub fn new(memory: Arc<MemoryController>, capacity: usize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            memory,
            hits: 0,
            misses: 0,
        }
    }

    /// Decoded instruction at `address`
    ///
    /// # Errors
    ///
    /// `AccessViolation` if the page is not executable, `MisalignedAccess`
    /// if `address` is not word aligned, `InvalidOpcode` if the word does not
    /// decode. Failed fetches are not cached.
    pub fn fetch(&mut self, address: u32) -> Result<Instruction> {
        if let Some(&instruction) = self.entries.get(address) {
            self.hits += 1;
            return Ok(instruction);
        }

        self.misses += 1;
        self.memory.check_access(address, PageFlags::EXECUTE, false)?;
        let word = self.memory.read_u32(address, true)?;
        let instruction = Instruction::decode(word)?;
        self.entries.insert(address, instruction);
        log::trace!("icache fill 0x{:06X}: {}", address, instruction);
        Ok(instruction)
    }

    /// Drop the entry for `address`
    pub fn invalidate(&mut self, address: u32) {
        self.entries.remove(address);
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
