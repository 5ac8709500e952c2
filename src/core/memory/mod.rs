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

//! Memory controller
//!
//! The memory controller owns all physical pages and the segment pool. Every
//! core shares one controller, so all operations take `&self` and synchronize
//! internally.
//!
//! # Memory Layout
//!
//! | Unit    | Size         | Index width |
//! |---------|--------------|-------------|
//! | Page    | 256 bytes    | 16 bits     |
//! | Segment | 256 pages    | 8 bits      |
//! | Memory  | up to 16MB   | 24-bit addr |
//!
//! A physical address is `segment * SEGMENT_SIZE + offset`. The hardware IRQ
//! and software INT vector tables sit at fixed flat addresses inside
//! segment 0, which is claimed at boot and never handed out.
//!
//! # Locking
//!
//! Two tiers:
//! - a structural lock serializes segment allocation, page allocation scans
//!   and the mmap table;
//! - page lookup and page content are guarded by a fixed table of shard
//!   locks, selected by `page_index % SHARD_COUNT`.
//!
//! A single-cell access (including `cas_u16`) is atomic. Nothing spanning two
//! cells is.
//!
//! # Example
//!
//! ```
//! use corvid::core::memory::{MemoryController, PageFlags, WriteMode};
//!
//! let memory = MemoryController::new(0x20000).unwrap();
//! memory.boot().unwrap();
//!
//! let segment = memory.alloc_segment().unwrap();
//! let address = u32::from(segment) << 16;
//!
//! // Fresh pages carry no permissions
//! assert!(memory.write_u16(address, 0x1234, WriteMode::USER).is_err());
//!
//! memory
//!     .update_area_flags(address, 256, PageFlags::READ | PageFlags::WRITE, true)
//!     .unwrap();
//! memory.write_u16(address, 0x1234, WriteMode::USER).unwrap();
//! assert_eq!(memory.read_u16(address, false).unwrap(), 0x1234);
//! ```

mod io_device;
mod mmap;
mod page;
mod program;
mod state;
#[cfg(test)]
mod tests;

pub use io_device::{ports, PortBus, PortHandler, TtyPort};
pub use page::PageFlags;
pub use program::LoadedProgram;

use crate::core::error::{EmulatorError, Result};
use crate::core::interrupt::{InterruptVector, VectorTable, VECTOR_COUNT, VECTOR_SIZE};
use mmap::MmapTable;
use page::Page;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// log2 of the page size
pub const PAGE_SHIFT: u32 = 8;

/// Page size in bytes
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// log2 of the segment size in bytes
pub const SEGMENT_SHIFT: u32 = 16;

/// Segment size in bytes (256 pages)
pub const SEGMENT_SIZE: u32 = 1 << SEGMENT_SHIFT;

/// Pages per segment
pub const PAGES_PER_SEGMENT: u32 = SEGMENT_SIZE >> PAGE_SHIFT;

/// Largest supported physical memory (24-bit addresses)
pub const MAX_MEMORY_SIZE: u32 = 1 << 24;

/// Number of shard locks guarding page data
const SHARD_COUNT: usize = 64;

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it
///
/// Page bytes and allocation tables stay structurally valid across a panic,
/// so a poisoned lock is not treated as fatal.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build a physical address from a segment and a 16-bit offset
#[inline(always)]
pub fn segment_address(segment: u8, offset: u16) -> u32 {
    (u32::from(segment) << SEGMENT_SHIFT) | u32::from(offset)
}

/// Page index of a physical address
#[inline(always)]
pub fn page_index(address: u32) -> u32 {
    address >> PAGE_SHIFT
}

/// How a write treats protection and the dirty flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMode {
    /// Skip the page's `WRITE` check
    pub privileged: bool,
    /// Mark the page dirty
    pub dirty: bool,
}

impl WriteMode {
    /// Ordinary program write: protection enforced, page marked dirty
    pub const USER: Self = Self {
        privileged: false,
        dirty: true,
    };

    /// Kernel or table-maintenance write
    pub const PRIVILEGED: Self = Self {
        privileged: true,
        dirty: true,
    };

    /// Privileged write that leaves the dirty flag alone (loading, restoring)
    pub const PRIVILEGED_CLEAN: Self = Self {
        privileged: true,
        dirty: false,
    };
}

/// Result of a compare-and-swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The cell held the expected value and now holds the new one
    Swapped,
    /// The cell held this value instead; nothing was written
    Observed(u16),
}

/// Structural state guarded by the coarse lock
struct Structure {
    /// Allocated segment indices
    segments: BTreeSet<u8>,
    /// Memory-mapped file regions
    mmap: MmapTable,
}

type Shard = HashMap<u32, Page>;

/// Shared physical memory
pub struct MemoryController {
    /// Memory size in bytes
    size: u32,

    /// Structural lock: segments, mmap table, allocation scans
    structure: Mutex<Structure>,

    /// Page table shards
    shards: Vec<Mutex<Shard>>,
}

impl MemoryController {
    /// Create a memory controller with `size` bytes of physical memory
    ///
    /// # Errors
    ///
    /// `Config` if `size` is zero, not a multiple of the segment size, or
    /// larger than 16MB.
    pub fn new(size: u32) -> Result<Self> {
        if size == 0 || size % SEGMENT_SIZE != 0 || size > MAX_MEMORY_SIZE {
            return Err(EmulatorError::Config(format!(
                "invalid memory size 0x{:X}",
                size
            )));
        }

        Ok(Self {
            size,
            structure: Mutex::new(Structure {
                segments: BTreeSet::new(),
                mmap: MmapTable::default(),
            }),
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        })
    }

    /// Claim segment 0 and create the vector table pages
    ///
    /// Vector table pages carry no user permissions; they are only touched
    /// through privileged accesses.
    pub fn boot(&self) -> Result<()> {
        lock(&self.structure).segments.insert(0);

        for table in [VectorTable::Irq, VectorTable::Int] {
            let first = page_index(table.address());
            let last = page_index(table.address() + (VECTOR_COUNT * VECTOR_SIZE) as u32 - 1);
            for index in first..=last {
                lock(self.shard(index))
                    .entry(index)
                    .or_insert_with(|| Page::anonymous(index));
            }
        }

        log::info!(
            "Memory controller booted: {} KB, {} segments, {} pages",
            self.size / 1024,
            self.segment_count(),
            self.page_count()
        );
        Ok(())
    }

    /// Physical memory size in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Total number of pages
    pub fn page_count(&self) -> u32 {
        self.size >> PAGE_SHIFT
    }

    /// Total number of segments
    pub fn segment_count(&self) -> u32 {
        self.size >> SEGMENT_SHIFT
    }

    #[inline(always)]
    fn shard(&self, index: u32) -> &Mutex<Shard> {
        &self.shards[index as usize % SHARD_COUNT]
    }

    // === Segments ===

    /// Allocate a free segment
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if every segment is in use.
    pub fn alloc_segment(&self) -> Result<u8> {
        let mut structure = lock(&self.structure);
        for segment in 1..self.segment_count() {
            let segment = segment as u8;
            if structure.segments.insert(segment) {
                log::debug!("Allocated segment {}", segment);
                return Ok(segment);
            }
        }
        Err(EmulatorError::ResourceExhausted("segment"))
    }

    /// Return a segment to the pool
    ///
    /// Pages inside the segment are left alone; free them first if they are
    /// no longer needed.
    pub fn free_segment(&self, segment: u8) -> Result<()> {
        if segment == 0 {
            return Err(EmulatorError::ResourceConflict(
                "segment 0 is reserved".to_string(),
            ));
        }
        if lock(&self.structure).segments.remove(&segment) {
            log::debug!("Freed segment {}", segment);
            Ok(())
        } else {
            Err(EmulatorError::ResourceNotFound(format!(
                "segment {} is not allocated",
                segment
            )))
        }
    }

    /// Whether a segment is currently allocated
    pub fn is_segment_allocated(&self, segment: u8) -> bool {
        lock(&self.structure).segments.contains(&segment)
    }

    /// Allocated segments in ascending order
    pub fn allocated_segments(&self) -> Vec<u8> {
        lock(&self.structure).segments.iter().copied().collect()
    }

    // === Pages ===

    fn page_range(&self, segment: Option<u8>) -> Result<std::ops::Range<u32>> {
        match segment {
            Some(segment) if u32::from(segment) < self.segment_count() => {
                let first = u32::from(segment) * PAGES_PER_SEGMENT;
                Ok(first..first + PAGES_PER_SEGMENT)
            }
            Some(segment) => Err(EmulatorError::ResourceNotFound(format!(
                "segment {} is outside physical memory",
                segment
            ))),
            None => Ok(0..self.page_count()),
        }
    }

    /// Allocate the first unused page, inside `segment` if given
    ///
    /// The new page is anonymous with all flags clear. Returns its index.
    pub fn alloc_page(&self, segment: Option<u8>) -> Result<u32> {
        let range = self.page_range(segment)?;
        let _structure = lock(&self.structure);

        for index in range {
            let mut shard = lock(self.shard(index));
            if let std::collections::hash_map::Entry::Vacant(slot) = shard.entry(index) {
                slot.insert(Page::anonymous(index));
                log::debug!("Allocated page {} (segment {:?})", index, segment);
                return Ok(index);
            }
        }
        Err(EmulatorError::ResourceExhausted("page"))
    }

    /// Allocate `count` contiguous unused pages, inside `segment` if given
    ///
    /// Returns the index of the first page.
    pub fn alloc_pages(&self, segment: Option<u8>, count: u32) -> Result<u32> {
        if count == 0 {
            return Err(EmulatorError::ResourceExhausted("page run of length 0"));
        }
        let range = self.page_range(segment)?;
        let _structure = lock(&self.structure);

        let mut start = range.start;
        'scan: while start + count <= range.end {
            for index in start..start + count {
                if lock(self.shard(index)).contains_key(&index) {
                    start = index + 1;
                    continue 'scan;
                }
            }

            let mut claimed = Vec::with_capacity(count as usize);
            for index in start..start + count {
                let mut shard = lock(self.shard(index));
                if shard.contains_key(&index) {
                    // Created lazily by a concurrent access; back out and move on
                    drop(shard);
                    for undo in claimed {
                        lock(self.shard(undo)).remove(&undo);
                    }
                    start = index + 1;
                    continue 'scan;
                }
                shard.insert(index, Page::anonymous(index));
                claimed.push(index);
            }

            log::debug!("Allocated pages {}..{}", start, start + count);
            return Ok(start);
        }
        Err(EmulatorError::ResourceExhausted("page run"))
    }

    /// Remove a page
    ///
    /// Cached references to the page must already be gone (see
    /// `DataCache::remove_page_references`). Mapped pages are released with
    /// `unmap_region` instead.
    pub fn free_page(&self, index: u32) -> Result<()> {
        let _structure = lock(&self.structure);
        let mut shard = lock(self.shard(index));
        match shard.get(&index) {
            Some(page) if page.is_mapped() => Err(EmulatorError::ResourceConflict(format!(
                "page {} belongs to a file mapping",
                index
            ))),
            Some(_) => {
                shard.remove(&index);
                log::debug!("Freed page {}", index);
                Ok(())
            }
            None => Err(EmulatorError::ResourceNotFound(format!(
                "page {} is not allocated",
                index
            ))),
        }
    }

    /// Whether a page currently exists
    pub fn page_exists(&self, index: u32) -> bool {
        lock(self.shard(index)).contains_key(&index)
    }

    /// Flags of the page at `index`, if it exists
    pub fn page_flags(&self, index: u32) -> Option<PageFlags> {
        lock(self.shard(index)).get(&index).map(|page| page.flags)
    }

    /// Set or clear `flags` on every page overlapping `address..address+size`
    ///
    /// Missing pages are created.
    pub fn update_area_flags(
        &self,
        address: u32,
        size: u32,
        flags: PageFlags,
        value: bool,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let end = address
            .checked_add(size - 1)
            .filter(|&end| end < self.size)
            .ok_or_else(|| {
                EmulatorError::AccessViolation(format!(
                    "area 0x{:06X}+0x{:X} is outside physical memory",
                    address, size
                ))
            })?;

        for index in page_index(address)..=page_index(end) {
            self.with_page_index(index, |page| {
                page.flags.set(flags, value);
                Ok(())
            })?;
        }
        log::trace!(
            "Area 0x{:06X}+0x{:X}: {:?} = {}",
            address,
            size,
            flags,
            value
        );
        Ok(())
    }

    /// Run `f` on the page holding `address`, creating it if needed
    fn with_page<R>(&self, address: u32, f: impl FnOnce(&mut Page) -> Result<R>) -> Result<R> {
        if address >= self.size {
            return Err(EmulatorError::AccessViolation(format!(
                "address 0x{:06X} is outside physical memory",
                address
            )));
        }
        self.with_page_index(page_index(address), f)
    }

    fn with_page_index<R>(&self, index: u32, f: impl FnOnce(&mut Page) -> Result<R>) -> Result<R> {
        let mut shard = lock(self.shard(index));
        let page = shard.entry(index).or_insert_with(|| {
            log::trace!("Created page {} on first access", index);
            Page::anonymous(index)
        });
        f(page)
    }

    #[inline]
    fn check_alignment(address: u32, size: u8) -> Result<()> {
        if address % u32::from(size) != 0 {
            return Err(EmulatorError::MisalignedAccess { address, size });
        }
        Ok(())
    }

    #[inline]
    fn check_flag(page: &Page, address: u32, flag: PageFlags, privileged: bool) -> Result<()> {
        if privileged || page.flags.contains(flag) {
            Ok(())
        } else {
            Err(EmulatorError::AccessViolation(format!(
                "{} access to page {} at 0x{:06X} (flags {:?})",
                flag.access_name(),
                page.index,
                address,
                page.flags
            )))
        }
    }

    /// Check that `address` may be accessed with `flag` without touching data
    ///
    /// Used by the caches to validate an address once, on their cold path.
    pub fn check_access(&self, address: u32, flag: PageFlags, privileged: bool) -> Result<()> {
        self.with_page(address, |page| Self::check_flag(page, address, flag, privileged))
    }

    #[inline]
    fn offset(address: u32) -> usize {
        address as usize & (PAGE_SIZE - 1)
    }

    // === Reads ===

    /// Read a byte
    pub fn read_u8(&self, address: u32, privileged: bool) -> Result<u8> {
        self.with_page(address, |page| {
            Self::check_flag(page, address, PageFlags::READ, privileged)?;
            Ok(page.read_u8(Self::offset(address)))
        })
    }

    /// Read a 16-bit little-endian word (2-byte aligned)
    pub fn read_u16(&self, address: u32, privileged: bool) -> Result<u16> {
        Self::check_alignment(address, 2)?;
        self.with_page(address, |page| {
            Self::check_flag(page, address, PageFlags::READ, privileged)?;
            Ok(page.read_u16(Self::offset(address)))
        })
    }

    /// Read a 32-bit little-endian word (4-byte aligned)
    pub fn read_u32(&self, address: u32, privileged: bool) -> Result<u32> {
        Self::check_alignment(address, 4)?;
        self.with_page(address, |page| {
            Self::check_flag(page, address, PageFlags::READ, privileged)?;
            Ok(page.read_u32(Self::offset(address)))
        })
    }

    // === Writes ===

    #[inline]
    fn begin_write(page: &mut Page, address: u32, mode: WriteMode) -> Result<()> {
        Self::check_flag(page, address, PageFlags::WRITE, mode.privileged)?;
        if mode.dirty {
            page.flags.insert(PageFlags::DIRTY);
        }
        Ok(())
    }

    /// Write a byte
    pub fn write_u8(&self, address: u32, value: u8, mode: WriteMode) -> Result<()> {
        self.with_page(address, |page| {
            Self::begin_write(page, address, mode)?;
            page.write_u8(Self::offset(address), value);
            Ok(())
        })
    }

    /// Write a 16-bit little-endian word (2-byte aligned)
    pub fn write_u16(&self, address: u32, value: u16, mode: WriteMode) -> Result<()> {
        Self::check_alignment(address, 2)?;
        self.with_page(address, |page| {
            Self::begin_write(page, address, mode)?;
            page.write_u16(Self::offset(address), value);
            Ok(())
        })
    }

    /// Write a 32-bit little-endian word (4-byte aligned)
    pub fn write_u32(&self, address: u32, value: u32, mode: WriteMode) -> Result<()> {
        Self::check_alignment(address, 4)?;
        self.with_page(address, |page| {
            Self::begin_write(page, address, mode)?;
            page.write_u32(Self::offset(address), value);
            Ok(())
        })
    }

    /// Atomically replace the 16-bit cell at `address` with `new` if it holds
    /// `expected`
    ///
    /// The page must be readable and writable. On mismatch the observed value
    /// is returned and memory is left untouched.
    pub fn cas_u16(&self, address: u32, expected: u16, new: u16) -> Result<CasOutcome> {
        Self::check_alignment(address, 2)?;
        self.with_page(address, |page| {
            Self::check_flag(page, address, PageFlags::READ, false)?;
            Self::check_flag(page, address, PageFlags::WRITE, false)?;

            let offset = Self::offset(address);
            let current = page.read_u16(offset);
            if current == expected {
                page.write_u16(offset, new);
                page.flags.insert(PageFlags::DIRTY);
                Ok(CasOutcome::Swapped)
            } else {
                Ok(CasOutcome::Observed(current))
            }
        })
    }

    // === Interrupt vectors ===

    fn vector_address(table: VectorTable, index: u8) -> Result<u32> {
        if usize::from(index) >= VECTOR_COUNT {
            return Err(EmulatorError::ResourceNotFound(format!(
                "{:?} vector {} (table holds {})",
                table, index, VECTOR_COUNT
            )));
        }
        Ok(table.address() + (usize::from(index) * VECTOR_SIZE) as u32)
    }

    /// Read one interrupt vector record
    pub fn load_interrupt_vector(&self, table: VectorTable, index: u8) -> Result<InterruptVector> {
        let address = Self::vector_address(table, index)?;
        let raw = self.read_u32(address, true)?;
        Ok(InterruptVector::from_raw(raw))
    }

    /// Write one interrupt vector record
    pub fn save_interrupt_vector(
        &self,
        table: VectorTable,
        index: u8,
        vector: InterruptVector,
    ) -> Result<()> {
        let address = Self::vector_address(table, index)?;
        self.write_u32(address, vector.to_raw(), WriteMode::PRIVILEGED)?;
        log::debug!("{:?} vector {} set to {}", table, index, vector);
        Ok(())
    }
}
