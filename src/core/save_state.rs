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

//! Machine state capture and restore
//!
//! Every record is encoded with bincode (little-endian, fixed-width integers)
//! and starts with a `u16` magic and a `u16` version. Decoding a record whose
//! magic or version does not match fails with `MalformedState`.
//!
//! - `CoreState`: one core's registers, call frames and pending IRQs
//! - `MemoryState`: the segment table and every anonymous page
//! - `MachineSnapshot`: all cores plus memory, with creation metadata
//!
//! Pages backed by a file mapping are not captured; their content lives in
//! the file.
//!
//! # Example
//!
//! ```
//! use corvid::core::memory::MemoryController;
//! use corvid::core::save_state::{self, MemoryState};
//!
//! let memory = MemoryController::new(0x20000).unwrap();
//! memory.boot().unwrap();
//!
//! let bytes = save_state::encode(&memory.save_state()).unwrap();
//! let state: MemoryState = save_state::decode(&bytes).unwrap();
//! memory.load_state(&state).unwrap();
//! ```

use super::cpu::{CallFrame, CoreStatus};
use super::error::{EmulatorError, Result};
use bincode::config::{self, Config};
use bincode::{Decode, Encode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Version shared by all state records
///
/// Increment whenever any record layout changes.
pub const STATE_VERSION: u16 = 2;

/// Magic of a `CoreState` record ("CS")
pub const CORE_STATE_MAGIC: u16 = 0x5343;

/// Magic of a `MemoryState` record ("MM")
pub const MEMORY_STATE_MAGIC: u16 = 0x4D4D;

/// Magic of a `MachineSnapshot` record ("SN")
pub const SNAPSHOT_MAGIC: u16 = 0x4E53;

/// bincode configuration used for every record
pub fn encoding() -> impl Config {
    config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// A record that carries its own magic and version
pub trait StateRecord: Encode + Decode<()> {
    /// Expected magic number
    const MAGIC: u16;

    /// Human-readable record name for error messages
    const NAME: &'static str;

    /// `(magic, version)` stored in this record
    fn header(&self) -> (u16, u16);
}

/// Encode a state record
pub fn encode<T: StateRecord>(record: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(record, encoding())
        .map_err(|e| EmulatorError::MalformedState(format!("{} encode: {}", T::NAME, e)))
}

/// Decode a state record and check its magic and version
pub fn decode<T: StateRecord>(bytes: &[u8]) -> Result<T> {
    let (record, _): (T, usize) = bincode::decode_from_slice(bytes, encoding())
        .map_err(|e| EmulatorError::MalformedState(format!("{} decode: {}", T::NAME, e)))?;
    check_header(&record)?;
    Ok(record)
}

/// Check a record's magic and version
pub fn check_header<T: StateRecord>(record: &T) -> Result<()> {
    let (magic, version) = record.header();
    if magic != T::MAGIC {
        return Err(EmulatorError::MalformedState(format!(
            "{}: bad magic 0x{:04X} (expected 0x{:04X})",
            T::NAME,
            magic,
            T::MAGIC
        )));
    }
    if version != STATE_VERSION {
        return Err(EmulatorError::MalformedState(format!(
            "{}: incompatible version {} (expected {})",
            T::NAME,
            version,
            STATE_VERSION
        )));
    }
    Ok(())
}

/// One core's architectural state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct CoreState {
    pub magic: u16,
    pub version: u16,

    /// Core index within the machine
    pub id: u32,

    /// Lifecycle state
    pub status: CoreStatus,

    /// General purpose registers (R0-R31)
    pub gpr: [u16; 32],

    pub fp: u16,
    pub sp: u16,
    pub ip: u16,
    pub flags: u16,
    pub cs: u8,
    pub ds: u8,

    /// Instruction counter
    pub cnt: u64,

    /// Waiting for an IRQ
    pub idle: bool,

    pub exit_code: i32,

    /// Call frames, outermost first
    pub frames: Vec<CallFrame>,

    /// IRQs queued while hardware interrupts were disabled
    pub pending_irqs: Vec<u8>,
}

impl StateRecord for CoreState {
    const MAGIC: u16 = CORE_STATE_MAGIC;
    const NAME: &'static str = "core state";

    fn header(&self) -> (u16, u16) {
        (self.magic, self.version)
    }
}

/// One anonymous page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PageState {
    /// Physical page index
    pub index: u32,
    /// Raw `PageFlags` bits
    pub flags: u8,
    /// Page content (256 bytes)
    pub content: Vec<u8>,
}

/// Physical memory contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct MemoryState {
    pub magic: u16,
    pub version: u16,

    /// Memory size in bytes; must match on restore
    pub size: u32,

    /// Allocated segments
    pub segments: Vec<u8>,

    /// Live anonymous pages in ascending index order
    pub pages: Vec<PageState>,
}

impl StateRecord for MemoryState {
    const MAGIC: u16 = MEMORY_STATE_MAGIC;
    const NAME: &'static str = "memory state";

    fn header(&self) -> (u16, u16) {
        (self.magic, self.version)
    }
}

/// Snapshot metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[bincode(encode_bounds = "", decode_bounds = "")]
pub struct SnapshotMetadata {
    /// When the snapshot was taken
    #[bincode(with_serde)]
    pub timestamp: DateTime<Utc>,

    /// Program image the machine was started with
    pub image: String,

    /// Instructions executed across all cores
    pub instructions: u64,
}

/// Complete machine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct MachineSnapshot {
    pub magic: u16,
    pub version: u16,
    pub metadata: SnapshotMetadata,
    pub cores: Vec<CoreState>,
    pub memory: MemoryState,
}

impl StateRecord for MachineSnapshot {
    const MAGIC: u16 = SNAPSHOT_MAGIC;
    const NAME: &'static str = "machine snapshot";

    fn header(&self) -> (u16, u16) {
        (self.magic, self.version)
    }
}

impl MachineSnapshot {
    /// Bundle core and memory states, stamped with the current time
    pub fn new(image: &str, cores: Vec<CoreState>, memory: MemoryState) -> Self {
        let instructions = cores.iter().map(|core| core.cnt).sum();
        Self {
            magic: SNAPSHOT_MAGIC,
            version: STATE_VERSION,
            metadata: SnapshotMetadata {
                timestamp: Utc::now(),
                image: image.to_string(),
                instructions,
            },
            cores,
            memory,
        }
    }

    /// Write the snapshot to a file in binary form
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded = encode(self)?;
        let mut file = File::create(path.as_ref())?;
        file.write_all(&encoded)?;
        log::info!(
            "Saved snapshot to {} ({} bytes)",
            path.as_ref().display(),
            encoded.len()
        );
        Ok(())
    }

    /// Read a binary snapshot file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let snapshot: Self = decode(&buffer)?;
        for core in &snapshot.cores {
            check_header(core)?;
        }
        check_header(&snapshot.memory)?;
        Ok(snapshot)
    }

    /// Pretty JSON rendering, for inspection
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EmulatorError::MalformedState(format!("snapshot to JSON: {}", e)))
    }

    /// Write the JSON rendering to a file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
