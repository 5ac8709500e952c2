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

//! Memory-mapped file regions
//!
//! A file region can be mapped over a page-aligned range of physical memory.
//! Every page in the range views the same `MmapMut`, so writes through any
//! page are visible through the others and, for shared writable mappings,
//! reach the file.
//!
//! Open file handles are reference counted per path: mapping the same file
//! twice reuses one handle, and the handle is closed with the last mapping.

use super::page::{Page, PageFlags};
use super::{lock, MemoryController, PAGE_SHIFT, PAGE_SIZE};
use crate::core::error::{EmulatorError, Result};
use memmap2::{MmapMut, MmapOptions};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Mapped bytes shared by every page of one mapping
pub(crate) struct MappedRegion {
    map: Mutex<MmapMut>,
}

impl MappedRegion {
    pub(super) fn read(&self, offset: usize, out: &mut [u8]) {
        let map = lock(&self.map);
        out.copy_from_slice(&map[offset..offset + out.len()]);
    }

    pub(super) fn write(&self, offset: usize, bytes: &[u8]) {
        let mut map = lock(&self.map);
        map[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn flush(&self) -> std::io::Result<()> {
        lock(&self.map).flush()
    }
}

/// An open backing file
struct OpenFile {
    file: File,
    writable: bool,
    refs: usize,
}

/// One live mapping
struct Mapping {
    region: Arc<MappedRegion>,
    path: PathBuf,
    first_page: u32,
    page_count: u32,
    shared: bool,
    writable: bool,
}

/// Table of mappings and their backing files, guarded by the controller's
/// structural lock
#[derive(Default)]
pub(super) struct MmapTable {
    files: HashMap<PathBuf, OpenFile>,
    mappings: BTreeMap<u32, Mapping>,
}

impl MmapTable {
    /// Number of live mappings
    pub(super) fn len(&self) -> usize {
        self.mappings.len()
    }

    fn acquire_file(&mut self, path: &Path, writable: bool) -> Result<&File> {
        if let Some(open) = self.files.get(path) {
            if writable && !open.writable {
                return Err(EmulatorError::ResourceConflict(format!(
                    "{} is already mapped read-only",
                    path.display()
                )));
            }
        } else {
            let file = OpenOptions::new().read(true).write(writable).open(path)?;
            log::debug!("Opened mapping backend {}", path.display());
            self.files.insert(
                path.to_path_buf(),
                OpenFile {
                    file,
                    writable,
                    refs: 0,
                },
            );
        }
        let open = self
            .files
            .get_mut(path)
            .ok_or_else(|| EmulatorError::ResourceNotFound(path.display().to_string()))?;
        open.refs += 1;
        Ok(&open.file)
    }

    fn release_file(&mut self, path: &Path) {
        if let Some(open) = self.files.get_mut(path) {
            open.refs -= 1;
            if open.refs == 0 {
                self.files.remove(path);
                log::debug!("Closed mapping backend {}", path.display());
            }
        }
    }
}

impl MemoryController {
    /// Map `size` bytes of the file at `path`, starting at byte `offset`, over
    /// physical memory at `address`
    ///
    /// # Arguments
    ///
    /// * `access` - Page flags for the mapped pages (`READ`, `WRITE`, `EXECUTE`)
    /// * `shared` - Write changes back to the file; otherwise the mapping is
    ///   private copy-on-write
    ///
    /// # Errors
    ///
    /// - `AccessViolation` if the range is not page aligned or leaves memory
    /// - `ResourceConflict` if any page in the range already exists
    /// - `StorageAccess` if the file is shorter than `offset + size`
    pub fn mmap_region<P: AsRef<Path>>(
        &self,
        path: P,
        offset: u64,
        size: u32,
        address: u32,
        access: PageFlags,
        shared: bool,
    ) -> Result<()> {
        let path = path.as_ref();

        if size == 0 || address as usize % PAGE_SIZE != 0 || size as usize % PAGE_SIZE != 0 {
            return Err(EmulatorError::AccessViolation(format!(
                "mmap range 0x{:06X}+0x{:X} is not page aligned",
                address, size
            )));
        }
        if address.checked_add(size).is_none_or(|end| end > self.size) {
            return Err(EmulatorError::AccessViolation(format!(
                "mmap range 0x{:06X}+0x{:X} is outside physical memory",
                address, size
            )));
        }

        let first_page = address >> PAGE_SHIFT;
        let page_count = size >> PAGE_SHIFT;
        let access = access & (PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE);
        let writable = shared && access.contains(PageFlags::WRITE);

        let mut structure = lock(&self.structure);

        for index in first_page..first_page + page_count {
            if lock(self.shard(index)).contains_key(&index) {
                return Err(EmulatorError::ResourceConflict(format!(
                    "page {} already exists in mmap range 0x{:06X}+0x{:X}",
                    index, address, size
                )));
            }
        }

        let map = {
            let file = structure.mmap.acquire_file(path, writable)?;
            let file_len = file.metadata()?.len();
            if offset + u64::from(size) > file_len {
                structure.mmap.release_file(path);
                return Err(EmulatorError::StorageAccess(format!(
                    "{}: region 0x{:X}+0x{:X} exceeds file size 0x{:X}",
                    path.display(),
                    offset,
                    size,
                    file_len
                )));
            }

            let mut options = MmapOptions::new();
            options.offset(offset).len(size as usize);
            // SAFETY: the mapping is owned by the controller and only accessed
            // through the region mutex; external modification of the file is
            // outside the emulator's control, as with any mapped file.
            let mapped = unsafe {
                if writable {
                    options.map_mut(file)
                } else {
                    options.map_copy(file)
                }
            };
            match mapped {
                Ok(map) => map,
                Err(e) => {
                    structure.mmap.release_file(path);
                    return Err(e.into());
                }
            }
        };

        let region = Arc::new(MappedRegion {
            map: Mutex::new(map),
        });

        let mut inserted = Vec::with_capacity(page_count as usize);
        for (i, index) in (first_page..first_page + page_count).enumerate() {
            let mut shard = lock(self.shard(index));
            if shard.contains_key(&index) {
                // Lost a race with lazy page creation
                drop(shard);
                for &undo in &inserted {
                    lock(self.shard(undo)).remove(&undo);
                }
                structure.mmap.release_file(path);
                return Err(EmulatorError::ResourceConflict(format!(
                    "page {} appeared while mapping 0x{:06X}",
                    index, address
                )));
            }
            shard.insert(
                index,
                Page::mapped(index, Arc::clone(&region), i * PAGE_SIZE, access),
            );
            inserted.push(index);
        }

        structure.mmap.mappings.insert(
            address,
            Mapping {
                region,
                path: path.to_path_buf(),
                first_page,
                page_count,
                shared,
                writable,
            },
        );

        log::info!(
            "Mapped {}+0x{:X} at 0x{:06X} ({} pages, {}, {:?})",
            path.display(),
            offset,
            address,
            page_count,
            if shared { "shared" } else { "private" },
            access
        );
        Ok(())
    }

    /// Remove the mapping that starts at `address`
    ///
    /// Shared writable mappings are flushed to their file before the pages go
    /// away. The backing file is closed when its last mapping is removed.
    pub fn unmap_region(&self, address: u32) -> Result<()> {
        let mut structure = lock(&self.structure);
        let mapping = structure.mmap.mappings.remove(&address).ok_or_else(|| {
            EmulatorError::ResourceNotFound(format!("no mapping at 0x{:06X}", address))
        })?;

        for index in mapping.first_page..mapping.first_page + mapping.page_count {
            lock(self.shard(index)).remove(&index);
        }

        let flushed = if mapping.shared && mapping.writable {
            mapping.region.flush()
        } else {
            Ok(())
        };
        structure.mmap.release_file(&mapping.path);

        log::info!(
            "Unmapped {} from 0x{:06X}",
            mapping.path.display(),
            address
        );
        flushed.map_err(EmulatorError::from)
    }

    /// Number of live file mappings
    pub fn mapping_count(&self) -> usize {
        lock(&self.structure).mmap.len()
    }
}
