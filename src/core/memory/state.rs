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

//! Memory state capture and restore

use super::{lock, MemoryController, PageFlags, PAGE_SIZE};
use crate::core::error::{EmulatorError, Result};
use crate::core::save_state::{
    check_header, MemoryState, PageState, MEMORY_STATE_MAGIC, STATE_VERSION,
};
use super::page::Page;

impl MemoryController {
    /// Capture the segment table and every anonymous page
    ///
    /// Pages are listed in ascending index order. File-mapped pages are
    /// skipped. Shards are visited one at a time, so the capture is only
    /// consistent while no core is running.
    pub fn save_state(&self) -> MemoryState {
        let structure = lock(&self.structure);
        let segments = structure.segments.iter().copied().collect();

        let mut pages = Vec::new();
        for shard in &self.shards {
            let shard = lock(shard);
            pages.extend(shard.values().filter(|page| !page.is_mapped()).map(|page| {
                PageState {
                    index: page.index,
                    flags: page.flags.bits(),
                    content: page.content(),
                }
            }));
        }
        pages.sort_by_key(|page| page.index);

        log::debug!("Captured memory state: {} pages", pages.len());
        MemoryState {
            magic: MEMORY_STATE_MAGIC,
            version: STATE_VERSION,
            size: self.size,
            segments,
            pages,
        }
    }

    /// Replace memory contents with a captured state
    ///
    /// Every anonymous page is dropped and the captured pages are recreated.
    /// File mappings stay as they are. The state is validated before
    /// anything changes.
    ///
    /// # Errors
    ///
    /// `MalformedState` on a header or size mismatch, a page outside
    /// physical memory, a page that is not exactly one page long, or unknown
    /// flag bits. `ResourceConflict` if a captured page overlaps a mapping.
    pub fn load_state(&self, state: &MemoryState) -> Result<()> {
        check_header(state)?;
        if state.size != self.size {
            return Err(EmulatorError::MalformedState(format!(
                "memory size 0x{:X} does not match 0x{:X}",
                state.size, self.size
            )));
        }
        if let Some(segment) = state
            .segments
            .iter()
            .find(|&&segment| u32::from(segment) >= self.segment_count())
        {
            return Err(EmulatorError::MalformedState(format!(
                "segment {} is outside physical memory",
                segment
            )));
        }

        let mut restored = Vec::with_capacity(state.pages.len());
        for captured in &state.pages {
            if captured.index >= self.page_count() {
                return Err(EmulatorError::MalformedState(format!(
                    "page {} is outside physical memory",
                    captured.index
                )));
            }
            if captured.content.len() != PAGE_SIZE {
                return Err(EmulatorError::MalformedState(format!(
                    "page {} holds {} bytes",
                    captured.index,
                    captured.content.len()
                )));
            }
            let flags = PageFlags::from_bits(captured.flags).ok_or_else(|| {
                EmulatorError::MalformedState(format!(
                    "page {} has unknown flags 0x{:02X}",
                    captured.index, captured.flags
                ))
            })?;
            let mut page = Page::anonymous(captured.index);
            page.flags = flags;
            page.load_content(&captured.content);
            restored.push(page);
        }

        let mut structure = lock(&self.structure);

        for page in &restored {
            if lock(self.shard(page.index))
                .get(&page.index)
                .is_some_and(|existing| existing.is_mapped())
            {
                return Err(EmulatorError::ResourceConflict(format!(
                    "captured page {} overlaps a file mapping",
                    page.index
                )));
            }
        }

        structure.segments = state.segments.iter().copied().collect();
        structure.segments.insert(0);

        for shard in &self.shards {
            lock(shard).retain(|_, page| page.is_mapped());
        }
        for page in restored {
            lock(self.shard(page.index)).insert(page.index, page);
        }

        log::info!(
            "Restored memory state: {} segments, {} pages",
            structure.segments.len(),
            state.pages.len()
        );
        Ok(())
    }
}
