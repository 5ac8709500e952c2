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

//! Program image format
//!
//! Program images are produced by the external toolchain and consumed by
//! `MemoryController::load_program`. This module parses and writes them; it
//! knows nothing about assembly.
//!
//! # Layout
//!
//! All integers are little-endian.
//!
//! ```text
//! Header (8 bytes)
//!   0x00 u16 magic (0x4F43)
//!   0x02 u16 version (1)
//!   0x04 u16 section count
//!   0x06 u16 reserved
//! Section header (16 bytes each)
//!   0x00 u8  kind (0 TEXT, 1 DATA, 2 STACK, 3 SYMBOLS)
//!   0x01 u8  flags (READ 1, WRITE 2, EXECUTE 4, BSS 8)
//!   0x02 u16 reserved
//!   0x04 u32 base offset within the program segment
//!   0x08 u32 size in bytes
//!   0x0C u32 file offset of the body
//! Symbol record (40 bytes each, SYMBOLS body)
//!   0x00 [u8; 32] NUL-padded name
//!   0x20 u16 address
//!   0x22 u16 size
//!   0x24 u8  section index
//!   0x25 [u8; 3] padding
//! ```
//!
//! TEXT bodies are 32-bit instruction words. DATA bodies are raw bytes, absent
//! when the section is BSS. STACK sections have no body; their size is the
//! requested stack size.
//!
//! # Example
//!
//! ```
//! use corvid::core::loader::{ProgramImage, SectionFlags};
//!
//! let image = ProgramImage::new()
//!     .with_text(0x0000, &[0x0000_0000])
//!     .with_data(0x0100, b"hello", SectionFlags::READ)
//!     .with_stack(256)
//!     .with_symbol("main", 0x0000, 4, 0);
//!
//! let bytes = image.to_bytes();
//! let parsed = ProgramImage::parse(&bytes).unwrap();
//! assert_eq!(parsed.symbol("main").unwrap().address, 0);
//! ```

use super::error::{EmulatorError, Result};
use super::memory::SEGMENT_SIZE;
use bitflags::bitflags;
use std::path::Path;

/// Image magic number
pub const IMAGE_MAGIC: u16 = 0x4F43;

/// Image format version
pub const IMAGE_VERSION: u16 = 1;

const HEADER_SIZE: usize = 8;
const SECTION_HEADER_SIZE: usize = 16;
const SYMBOL_RECORD_SIZE: usize = 40;
const SYMBOL_NAME_SIZE: usize = 32;

/// Kind of an image section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionKind {
    Text = 0,
    Data = 1,
    Stack = 2,
    Symbols = 3,
}

impl TryFrom<u8> for SectionKind {
    type Error = EmulatorError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::Data),
            2 => Ok(Self::Stack),
            3 => Ok(Self::Symbols),
            other => Err(EmulatorError::MalformedImage(format!(
                "unknown section kind {}",
                other
            ))),
        }
    }
}

bitflags! {
    /// Section attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Zero-filled, no body in the file
        const BSS = 1 << 3;
    }
}

/// One loadable section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub flags: SectionFlags,
    /// Offset within the program segment
    pub base: u32,
    /// Size in bytes
    pub size: u32,
    /// Section body (empty for BSS and STACK)
    pub content: Vec<u8>,
}

impl Section {
    /// TEXT content as instruction words
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.content
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }
}

/// A named address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u16,
    pub size: u16,
    pub section: u8,
}

/// Parsed program image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramImage {
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl ProgramImage {
    /// Create an empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and parse an image file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let image = Self::parse(&data)?;
        log::info!(
            "Loaded program image {}: {} sections, {} symbols",
            path.display(),
            image.sections.len(),
            image.symbols.len()
        );
        Ok(image)
    }

    /// Parse an image from bytes
    ///
    /// # Errors
    ///
    /// `MalformedImage` on a bad magic or version, truncated headers or
    /// bodies, sections that do not fit in one segment, or misaligned TEXT.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(EmulatorError::MalformedImage("file too small".to_string()));
        }

        let magic = read_u16(data, 0);
        if magic != IMAGE_MAGIC {
            return Err(EmulatorError::MalformedImage(format!(
                "bad magic 0x{:04X}",
                magic
            )));
        }
        let version = read_u16(data, 2);
        if version != IMAGE_VERSION {
            return Err(EmulatorError::MalformedImage(format!(
                "unsupported version {}",
                version
            )));
        }

        let count = usize::from(read_u16(data, 4));
        let headers_end = HEADER_SIZE + count * SECTION_HEADER_SIZE;
        if data.len() < headers_end {
            return Err(EmulatorError::MalformedImage(
                "section headers truncated".to_string(),
            ));
        }

        let mut image = Self::new();
        for i in 0..count {
            let header = &data[HEADER_SIZE + i * SECTION_HEADER_SIZE..];
            let kind = SectionKind::try_from(header[0])?;
            let flags = SectionFlags::from_bits(header[1]).ok_or_else(|| {
                EmulatorError::MalformedImage(format!(
                    "section {} has unknown flags 0x{:02X}",
                    i, header[1]
                ))
            })?;
            let base = read_u32(header, 4);
            let size = read_u32(header, 8);
            let file_offset = read_u32(header, 12) as usize;

            let has_body = match kind {
                SectionKind::Text | SectionKind::Symbols => true,
                SectionKind::Data => !flags.contains(SectionFlags::BSS),
                SectionKind::Stack => false,
            };
            let content = if has_body {
                data.get(file_offset..file_offset + size as usize)
                    .ok_or_else(|| {
                        EmulatorError::MalformedImage(format!("section {} body truncated", i))
                    })?
                    .to_vec()
            } else {
                Vec::new()
            };

            if kind == SectionKind::Symbols {
                image.symbols.extend(Self::parse_symbols(&content)?);
                continue;
            }

            let section = Section {
                kind,
                flags,
                base,
                size,
                content,
            };
            image.sections.push(section);
        }

        image.validate()?;
        Ok(image)
    }

    /// Check that every section can be placed
    ///
    /// TEXT and DATA sections must fit inside one segment, TEXT must be word
    /// aligned, and no two placed sections may share a byte.
    ///
    /// # Errors
    ///
    /// `MalformedImage` naming the first offending section.
    pub fn validate(&self) -> Result<()> {
        for (i, section) in self.sections.iter().enumerate() {
            Self::validate_section(i, section)?;
        }

        let mut placed: Vec<(usize, &Section)> = self
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind != SectionKind::Stack && s.size > 0)
            .collect();
        placed.sort_by_key(|(_, s)| s.base);
        for pair in placed.windows(2) {
            let (first, a) = pair[0];
            let (second, b) = pair[1];
            if a.base + a.size > b.base {
                return Err(EmulatorError::MalformedImage(format!(
                    "sections {} and {} overlap at 0x{:04X}",
                    first, second, b.base
                )));
            }
        }
        Ok(())
    }

    fn validate_section(index: usize, section: &Section) -> Result<()> {
        if section.kind != SectionKind::Stack
            && u64::from(section.base) + u64::from(section.size) > u64::from(SEGMENT_SIZE)
        {
            return Err(EmulatorError::MalformedImage(format!(
                "section {} (0x{:X}+0x{:X}) does not fit in one segment",
                index, section.base, section.size
            )));
        }
        if section.kind == SectionKind::Text && (section.base % 4 != 0 || section.size % 4 != 0)
        {
            return Err(EmulatorError::MalformedImage(format!(
                "text section {} is not word aligned",
                index
            )));
        }
        Ok(())
    }

    fn parse_symbols(body: &[u8]) -> Result<Vec<Symbol>> {
        if body.len() % SYMBOL_RECORD_SIZE != 0 {
            return Err(EmulatorError::MalformedImage(
                "symbol table size is not a multiple of the record size".to_string(),
            ));
        }

        body.chunks_exact(SYMBOL_RECORD_SIZE)
            .map(|record| {
                let raw_name = &record[..SYMBOL_NAME_SIZE];
                let len = raw_name
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(SYMBOL_NAME_SIZE);
                let name = std::str::from_utf8(&raw_name[..len])
                    .map_err(|_| {
                        EmulatorError::MalformedImage("symbol name is not UTF-8".to_string())
                    })?
                    .to_string();
                Ok(Symbol {
                    name,
                    address: read_u16(record, 32),
                    size: read_u16(record, 34),
                    section: record[36],
                })
            })
            .collect()
    }

    /// Serialize the image
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut symbol_body = Vec::with_capacity(self.symbols.len() * SYMBOL_RECORD_SIZE);
        for symbol in &self.symbols {
            let mut name = [0u8; SYMBOL_NAME_SIZE];
            let bytes = symbol.name.as_bytes();
            let len = bytes.len().min(SYMBOL_NAME_SIZE);
            name[..len].copy_from_slice(&bytes[..len]);
            symbol_body.extend_from_slice(&name);
            symbol_body.extend_from_slice(&symbol.address.to_le_bytes());
            symbol_body.extend_from_slice(&symbol.size.to_le_bytes());
            symbol_body.push(symbol.section);
            symbol_body.extend_from_slice(&[0u8; 3]);
        }

        let count = self.sections.len() + usize::from(!self.symbols.is_empty());
        let mut headers = Vec::with_capacity(count * SECTION_HEADER_SIZE);
        let mut bodies = Vec::new();
        let mut body_offset = HEADER_SIZE + count * SECTION_HEADER_SIZE;

        let mut push_section = |kind: SectionKind, flags: SectionFlags, base: u32, size: u32, body: &[u8]| {
            headers.push(kind as u8);
            headers.push(flags.bits());
            headers.extend_from_slice(&0u16.to_le_bytes());
            headers.extend_from_slice(&base.to_le_bytes());
            headers.extend_from_slice(&size.to_le_bytes());
            headers.extend_from_slice(&(body_offset as u32).to_le_bytes());
            bodies.extend_from_slice(body);
            body_offset += body.len();
        };

        for section in &self.sections {
            push_section(
                section.kind,
                section.flags,
                section.base,
                section.size,
                &section.content,
            );
        }
        if !self.symbols.is_empty() {
            push_section(
                SectionKind::Symbols,
                SectionFlags::empty(),
                0,
                symbol_body.len() as u32,
                &symbol_body,
            );
        }

        let mut out = Vec::with_capacity(body_offset);
        out.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
        out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        out.extend_from_slice(&(count as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&headers);
        out.extend_from_slice(&bodies);
        out
    }

    // === Builder ===

    /// Add a readable, executable TEXT section
    pub fn with_text(mut self, base: u32, words: &[u32]) -> Self {
        let content: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.sections.push(Section {
            kind: SectionKind::Text,
            flags: SectionFlags::READ | SectionFlags::EXECUTE,
            base,
            size: content.len() as u32,
            content,
        });
        self
    }

    /// Add a DATA section with initial content
    pub fn with_data(mut self, base: u32, bytes: &[u8], flags: SectionFlags) -> Self {
        self.sections.push(Section {
            kind: SectionKind::Data,
            flags: flags - SectionFlags::BSS,
            base,
            size: bytes.len() as u32,
            content: bytes.to_vec(),
        });
        self
    }

    /// Add a zero-filled, readable and writable DATA section
    pub fn with_bss(mut self, base: u32, size: u32) -> Self {
        self.sections.push(Section {
            kind: SectionKind::Data,
            flags: SectionFlags::READ | SectionFlags::WRITE | SectionFlags::BSS,
            base,
            size,
            content: Vec::new(),
        });
        self
    }

    /// Request a stack of `size` bytes
    pub fn with_stack(mut self, size: u32) -> Self {
        self.sections.push(Section {
            kind: SectionKind::Stack,
            flags: SectionFlags::READ | SectionFlags::WRITE,
            base: 0,
            size,
            content: Vec::new(),
        });
        self
    }

    /// Add a symbol
    pub fn with_symbol(mut self, name: &str, address: u16, size: u16, section: u8) -> Self {
        self.symbols.push(Symbol {
            name: name.to_string(),
            address,
            size,
            section,
        });
        self
    }

    // === Queries ===

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Look up a symbol by name
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// The first TEXT section
    pub fn text(&self) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == SectionKind::Text)
    }

    /// The STACK section, if the image asks for one
    pub fn stack(&self) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == SectionKind::Stack)
    }
}
