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

//! Machine configuration
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a usable single-core machine.
//!
//! # Example
//!
//! ```
//! use corvid::core::config::MachineConfig;
//!
//! let config = MachineConfig::from_toml_str(
//!     r#"
//!     [memory]
//!     size = 0x40000
//!
//!     [cpu]
//!     cores = 2
//!     dcache_size = 64
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.cpu.cores, 2);
//! assert_eq!(config.cpu.icache_size, 256);
//! ```

use super::error::{EmulatorError, Result};
use super::memory::{MAX_MEMORY_SIZE, SEGMENT_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete machine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Memory controller settings
    pub memory: MemoryConfig,

    /// CPU core settings
    pub cpu: CpuConfig,

    /// Block storage devices attached at boot
    pub storage: Vec<StorageConfig>,
}

/// Memory controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Size of physical memory in bytes
    ///
    /// Must be a multiple of the segment size (64KB) and at most 16MB.
    pub size: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { size: 0x10000 * 4 }
    }
}

/// CPU core settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Number of cores, one host thread each
    pub cores: usize,

    /// Instruction cache capacity (decoded instructions)
    pub icache_size: usize,

    /// Data cache capacity (16-bit words)
    pub dcache_size: usize,

    /// Verify `SP == FP` whenever a call frame is destroyed
    pub check_frames: bool,

    /// Symbol used as the program entry point
    pub entry_symbol: String,

    /// Capacity of each core's mailbox
    pub mailbox_capacity: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            cores: 1,
            icache_size: 256,
            dcache_size: 256,
            check_frames: false,
            entry_symbol: "main".to_string(),
            mailbox_capacity: 64,
        }
    }
}

/// A file-backed block storage device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage id used by the block I/O interrupt (`R1`)
    pub id: u16,

    /// Backing file
    pub path: PathBuf,

    /// Block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_block_size() -> usize {
    crate::core::storage::DEFAULT_BLOCK_SIZE
}

impl MachineConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Config` if it does not
    /// parse or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded machine configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| EmulatorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EmulatorError::Config(e.to_string()))
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<()> {
        let size = self.memory.size;
        if size == 0 || size % SEGMENT_SIZE != 0 {
            return Err(EmulatorError::Config(format!(
                "memory size 0x{:X} is not a non-zero multiple of the segment size 0x{:X}",
                size, SEGMENT_SIZE
            )));
        }
        if size > MAX_MEMORY_SIZE {
            return Err(EmulatorError::Config(format!(
                "memory size 0x{:X} exceeds the 24-bit address space",
                size
            )));
        }
        if self.cpu.cores == 0 {
            return Err(EmulatorError::Config("at least one core is required".into()));
        }
        if self.cpu.icache_size == 0 || self.cpu.dcache_size == 0 {
            return Err(EmulatorError::Config("cache sizes must be non-zero".into()));
        }
        if self.cpu.mailbox_capacity == 0 {
            return Err(EmulatorError::Config("mailbox capacity must be non-zero".into()));
        }
        for storage in &self.storage {
            if storage.block_size == 0 {
                return Err(EmulatorError::Config(format!(
                    "storage {} has a zero block size",
                    storage.id
                )));
            }
        }
        Ok(())
    }
}
