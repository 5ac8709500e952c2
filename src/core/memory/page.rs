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

//! Physical memory pages
//!
//! A page is the unit of protection and locking. Its bytes live either in a
//! private buffer (anonymous pages) or in a window of a memory-mapped file
//! (mapped pages). Both kinds expose the same little-endian accessors.

use super::mmap::MappedRegion;
use super::PAGE_SIZE;
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Per-page protection and state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u8 {
        /// Page may be read by unprivileged accesses
        const READ = 1 << 0;
        /// Page may be written by unprivileged accesses
        const WRITE = 1 << 1;
        /// Instructions may be fetched from the page
        const EXECUTE = 1 << 2;
        /// Page content changed since the flag was last cleared
        const DIRTY = 1 << 3;
    }
}

impl PageFlags {
    /// Human readable name of a single access flag, for fault reports
    pub(crate) fn access_name(self) -> &'static str {
        if self == Self::READ {
            "read"
        } else if self == Self::WRITE {
            "write"
        } else if self == Self::EXECUTE {
            "execute"
        } else {
            "access"
        }
    }
}

/// Storage behind a page
enum PageBacking {
    /// Private zero-initialized buffer
    Anonymous(Box<[u8; PAGE_SIZE]>),

    /// Window into a mapped file region
    Mapped {
        region: Arc<MappedRegion>,
        /// Byte offset of this page inside the region
        offset: usize,
    },
}

/// A single 256-byte page
pub(crate) struct Page {
    /// Page index (address >> PAGE_SHIFT)
    pub index: u32,

    /// Protection flags
    pub flags: PageFlags,

    backing: PageBacking,
}

impl Page {
    /// Create an anonymous page with all flags clear
    pub fn anonymous(index: u32) -> Self {
        Self {
            index,
            flags: PageFlags::empty(),
            backing: PageBacking::Anonymous(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// Create a page viewing `region` starting at `offset`
    pub fn mapped(index: u32, region: Arc<MappedRegion>, offset: usize, flags: PageFlags) -> Self {
        Self {
            index,
            flags,
            backing: PageBacking::Mapped { region, offset },
        }
    }

    /// Whether the page is backed by a mapped file
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, PageBacking::Mapped { .. })
    }

    #[inline]
    fn read_bytes<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        match &self.backing {
            PageBacking::Anonymous(data) => out.copy_from_slice(&data[offset..offset + N]),
            PageBacking::Mapped { region, offset: base } => {
                region.read(base + offset, &mut out);
            }
        }
        out
    }

    #[inline]
    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        match &mut self.backing {
            PageBacking::Anonymous(data) => {
                data[offset..offset + bytes.len()].copy_from_slice(bytes)
            }
            PageBacking::Mapped { region, offset: base } => region.write(*base + offset, bytes),
        }
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.read_bytes::<1>(offset)[0]
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.read_bytes(offset))
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.read_bytes(offset))
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Copy of the page's bytes
    pub fn content(&self) -> Vec<u8> {
        self.read_bytes::<PAGE_SIZE>(0).to_vec()
    }

    /// Replace the page's bytes; `content` must be exactly one page long
    pub fn load_content(&mut self, content: &[u8]) {
        self.write_bytes(0, &content[..PAGE_SIZE]);
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("flags", &self.flags)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
