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

//! Program loading
//!
//! Places a parsed `ProgramImage` into a fresh segment and reports where
//! execution should start.

use super::{page_index, segment_address, MemoryController, PageFlags, WriteMode, PAGE_SIZE, SEGMENT_SIZE};
use crate::core::error::Result;
use crate::core::loader::{ProgramImage, Section, SectionFlags, SectionKind, Symbol};

/// Where a loaded program lives and where it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedProgram {
    /// Code segment
    pub cs: u8,
    /// Data segment (same segment as code)
    pub ds: u8,
    /// Initial stack pointer, top of the stack pages (0 if no stack)
    pub sp: u16,
    /// Entry point
    pub ip: u16,
    /// Symbol table carried by the image
    pub symbols: Vec<Symbol>,
}

impl LoadedProgram {
    /// Offset of a named symbol
    pub fn symbol(&self, name: &str) -> Option<u16> {
        self.symbols
            .iter()
            .find(|symbol| symbol.name == name)
            .map(|symbol| symbol.address)
    }
}

fn section_access(flags: SectionFlags) -> PageFlags {
    let mut access = PageFlags::empty();
    access.set(PageFlags::READ, flags.contains(SectionFlags::READ));
    access.set(PageFlags::WRITE, flags.contains(SectionFlags::WRITE));
    access.set(PageFlags::EXECUTE, flags.contains(SectionFlags::EXECUTE));
    access
}

impl MemoryController {
    /// Load a program image into a newly allocated segment
    ///
    /// TEXT and DATA are written with privileged, clean writes, then each
    /// section's pages get the section's R/W/X permissions. A STACK section
    /// becomes a run of read+write pages on pages no other section touches,
    /// whatever its position in the image. The entry point is `entry_symbol` if the image defines it,
    /// otherwise the start of the first TEXT section.
    ///
    /// # Errors
    ///
    /// `MalformedImage` if a section leaves the segment or overlaps another,
    /// `ResourceExhausted` if no segment or stack pages are left. The segment
    /// is returned to the pool on failure.
    pub fn load_program(&self, image: &ProgramImage, entry_symbol: &str) -> Result<LoadedProgram> {
        image.validate()?;
        let segment = self.alloc_segment()?;
        match self.place_program(segment, image, entry_symbol) {
            Ok(program) => Ok(program),
            Err(e) => {
                self.free_segment(segment)?;
                Err(e)
            }
        }
    }

    fn place_program(
        &self,
        segment: u8,
        image: &ProgramImage,
        entry_symbol: &str,
    ) -> Result<LoadedProgram> {
        let placed = image
            .sections()
            .iter()
            .filter(|section| matches!(section.kind, SectionKind::Text | SectionKind::Data));
        for section in placed {
            self.place_section(segment, section)?;
        }

        // Stack pages come from whatever the sections left free
        let sp = match image.stack() {
            Some(stack) => self.place_stack(segment, stack.size)?,
            None => 0,
        };

        let ip = match image.symbol(entry_symbol) {
            Some(symbol) => symbol.address,
            None => {
                if !image.symbols().is_empty() {
                    log::warn!(
                        "Entry symbol '{}' not found, starting at text base",
                        entry_symbol
                    );
                }
                image.text().map(|text| text.base as u16).unwrap_or(0)
            }
        };

        log::info!(
            "Loaded program into segment {}: ip=0x{:04X} sp=0x{:04X}",
            segment,
            ip,
            sp
        );

        Ok(LoadedProgram {
            cs: segment,
            ds: segment,
            sp,
            ip,
            symbols: image.symbols().to_vec(),
        })
    }

    fn place_section(&self, segment: u8, section: &Section) -> Result<()> {
        let base = segment_address(segment, 0) + section.base;

        if section.kind == SectionKind::Text {
            for (i, word) in section.words().enumerate() {
                self.write_u32(base + (i as u32) * 4, word, WriteMode::PRIVILEGED_CLEAN)?;
            }
        } else if section.flags.contains(SectionFlags::BSS) {
            for offset in 0..section.size {
                self.write_u8(base + offset, 0, WriteMode::PRIVILEGED_CLEAN)?;
            }
        } else {
            for (offset, &byte) in section.content.iter().enumerate() {
                self.write_u8(base + offset as u32, byte, WriteMode::PRIVILEGED_CLEAN)?;
            }
        }

        let access = section_access(section.flags);
        self.update_area_flags(base, section.size, access, true)?;
        log::debug!(
            "{:?} section at 0x{:06X}+0x{:X} ({:?})",
            section.kind,
            base,
            section.size,
            access
        );
        Ok(())
    }

    /// Allocate the stack pages and return the initial stack pointer
    fn place_stack(&self, segment: u8, size: u32) -> Result<u16> {
        let count = size.div_ceil(PAGE_SIZE as u32).max(1);
        let first = self.alloc_pages(Some(segment), count)?;
        let bottom = first << super::PAGE_SHIFT;
        let bytes = count * PAGE_SIZE as u32;
        self.update_area_flags(bottom, bytes, PageFlags::READ | PageFlags::WRITE, true)?;

        // A stack ending at the segment boundary starts at offset 0 and
        // grows down into the segment's last word
        let top = (bottom + bytes) - segment_address(segment, 0);
        debug_assert!(top <= SEGMENT_SIZE);
        debug_assert_eq!(page_index(bottom) >> 8, u32::from(segment));
        Ok((top % SEGMENT_SIZE) as u16)
    }
}
