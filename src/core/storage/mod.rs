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

//! File-backed block storage
//!
//! A storage device is a host file addressed in fixed-size blocks. Guest
//! code reaches devices through the block I/O virtual interrupt
//! (`ints::BLOCKIO`), see [`BlockIo`] for the register convention.
//!
//! Transfers are all-or-nothing with respect to bounds: a request that
//! reaches past the end of the file is rejected before any byte moves.
//!
//! # Example
//!
//! ```
//! use corvid::core::storage::FileBackedStorage;
//!
//! let file = tempfile::NamedTempFile::new().unwrap();
//! let mut disk = FileBackedStorage::create(0, file.path(), 512, 4).unwrap();
//!
//! disk.write_block(1, &[7u8; 512], 1).unwrap();
//! let mut buf = [0u8; 512];
//! disk.read_block(1, &mut buf, 1).unwrap();
//! assert_eq!(buf[0], 7);
//!
//! // Block 4 is past the end of a 4-block device
//! assert!(disk.read_block(3, &mut [0u8; 1024], 2).is_err());
//! ```

mod block_io;

pub use block_io::{ops, status, BlockIo};

use crate::core::config::StorageConfig;
use crate::core::error::{EmulatorError, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Block size used when the configuration names none
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// A block device backed by a host file
#[derive(Debug)]
pub struct FileBackedStorage {
    id: u16,
    path: PathBuf,
    file: File,
    /// File size in bytes
    size: u64,
    block_size: usize,
}

impl FileBackedStorage {
    /// Open an existing file as device `id`
    ///
    /// The file is opened read-write. A trailing partial block is
    /// addressable only up to the end of the file.
    pub fn open<P: AsRef<Path>>(id: u16, path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if block_size == 0 {
            return Err(EmulatorError::Config(format!(
                "storage {}: block size must be non-zero",
                id
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                EmulatorError::StorageAccess(format!(
                    "storage {}: cannot open '{}': {}",
                    id,
                    path.display(),
                    e
                ))
            })?;
        let size = file.metadata()?.len();

        log::info!(
            "Storage {}: '{}', {} bytes, {} blocks of {} bytes",
            id,
            path.display(),
            size,
            size / block_size as u64,
            block_size
        );

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            size,
            block_size,
        })
    }

    /// Create (or truncate) a zero-filled file of `blocks` blocks
    pub fn create<P: AsRef<Path>>(id: u16, path: P, block_size: usize, blocks: u64) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        file.set_len(blocks * block_size as u64)?;
        drop(file);
        Self::open(id, path, block_size)
    }

    /// Open the device described by a `[[storage]]` config entry
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(config.id, &config.path, config.block_size)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of whole blocks
    pub fn block_count(&self) -> u64 {
        self.size / self.block_size as u64
    }

    /// Byte range of `count` blocks from `first`, checked against the file
    /// size and the caller's buffer
    fn extent(&self, first: u32, count: u32, buffer_len: usize) -> Result<(u64, usize)> {
        let start = u64::from(first) * self.block_size as u64;
        let len = u64::from(count) * self.block_size as u64;
        let end = start + len;

        if end > self.size {
            return Err(EmulatorError::StorageAccess(format!(
                "storage {}: blocks {}..{} end at byte {} past device end {}",
                self.id,
                first,
                u64::from(first) + u64::from(count),
                end,
                self.size
            )));
        }
        if (buffer_len as u64) < len {
            return Err(EmulatorError::StorageAccess(format!(
                "storage {}: buffer of {} bytes cannot hold {} blocks",
                self.id, buffer_len, count
            )));
        }
        Ok((start, len as usize))
    }

    /// Read `count` blocks starting at block `src` into `dst`
    ///
    /// # Errors
    ///
    /// `StorageAccess` if `(src + count) * block_size` exceeds the device
    /// size or `dst` is too short. Nothing is read in that case.
    pub fn read_block(&mut self, src: u32, dst: &mut [u8], count: u32) -> Result<()> {
        let (start, len) = self.extent(src, count, dst.len())?;
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut dst[..len])?;
        log::trace!("storage {}: read {} blocks at {}", self.id, count, src);
        Ok(())
    }

    /// Write `count` blocks from `src` starting at block `dst`
    ///
    /// # Errors
    ///
    /// `StorageAccess` under the same conditions as [`read_block`](Self::read_block).
    pub fn write_block(&mut self, dst: u32, src: &[u8], count: u32) -> Result<()> {
        let (start, len) = self.extent(dst, count, src.len())?;
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_all(&src[..len])?;
        log::trace!("storage {}: wrote {} blocks at {}", self.id, count, dst);
        Ok(())
    }

    /// Push written data to the host file system
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Devices by id, shared between the machine and the block I/O handler
#[derive(Debug, Default)]
pub struct StorageRegistry {
    devices: HashMap<u16, Arc<Mutex<FileBackedStorage>>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every configured device
    pub fn from_config(configs: &[StorageConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(FileBackedStorage::from_config(config)?)?;
        }
        Ok(registry)
    }

    /// Add a device
    ///
    /// # Errors
    ///
    /// `ResourceConflict` if a device with the same id exists.
    pub fn register(&mut self, storage: FileBackedStorage) -> Result<()> {
        let id = storage.id();
        if self.devices.contains_key(&id) {
            return Err(EmulatorError::ResourceConflict(format!(
                "storage id {} is already registered",
                id
            )));
        }
        self.devices.insert(id, Arc::new(Mutex::new(storage)));
        Ok(())
    }

    /// Lock device `id`
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` for an unknown id.
    pub fn device(&self, id: u16) -> Result<MutexGuard<'_, FileBackedStorage>> {
        self.devices
            .get(&id)
            .map(|device| device.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or_else(|| EmulatorError::ResourceNotFound(format!("storage id {}", id)))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Flush every device, logging failures
    pub fn flush_all(&self) {
        for (id, device) in &self.devices {
            let mut device = device.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = device.flush() {
                log::warn!("Storage {}: flush failed: {}", id, e);
            }
        }
    }
}
