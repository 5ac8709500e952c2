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

//! Interrupt vectors and virtual interrupts
//!
//! Two kinds of interrupt reach a core:
//!
//! - **Hardware IRQs**, raised by devices and delivered asynchronously. The
//!   core enters the handler found in the hardware IRQ vector table.
//! - **Software interrupts**, raised by the `INT` instruction. If a virtual
//!   interrupt handler is registered for the index, it runs synchronously on
//!   the host with no state switch. Otherwise the core enters the handler found
//!   in the software INT vector table, exactly as for an IRQ.
//!
//! ## Vector Tables
//!
//! ```text
//! Table | Address  | Entries | Record (little-endian)
//! ------|----------|---------|-------------------------
//! IRQ   | 0x000000 | 64      | [CS: u8][DS: u8][IP: u16]
//! INT   | 0x000100 | 64      | [CS: u8][DS: u8][IP: u16]
//! ```
//!
//! Both tables live in segment 0 and are accessed with privileged reads and
//! writes only.

use crate::core::cpu::CPUCore;
use crate::core::error::{EmulatorError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Number of entries in each vector table
pub const VECTOR_COUNT: usize = 64;

/// Size of one vector record in bytes
pub const VECTOR_SIZE: usize = 4;

/// Flat address of the hardware IRQ vector table
pub const IRQ_TABLE_ADDRESS: u32 = 0x000000;

/// Flat address of the software INT vector table
pub const INT_TABLE_ADDRESS: u32 = 0x000100;

/// Well-known hardware IRQ sources
pub mod irqs {
    /// Periodic timer
    pub const TIMER: u8 = 0;

    /// Console input available
    pub const CONSOLE: u8 = 1;

    /// Block storage transfer complete
    pub const STORAGE: u8 = 2;

    /// Real-time clock alarm
    pub const RTC: u8 = 3;
}

/// Well-known software interrupt indices
pub mod ints {
    /// Block storage I/O (see `core::storage`)
    pub const BLOCKIO: u8 = 1;

    /// Math coprocessor
    pub const MATH: u8 = 2;

    /// Host debugging hooks
    pub const DEBUG: u8 = 3;
}

/// Which vector table to consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorTable {
    /// Hardware IRQ table
    Irq,
    /// Software INT table
    Int,
}

impl VectorTable {
    /// Flat address of the table
    pub const fn address(self) -> u32 {
        match self {
            Self::Irq => IRQ_TABLE_ADDRESS,
            Self::Int => INT_TABLE_ADDRESS,
        }
    }
}

/// Handler entry point: code segment, data segment and instruction pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptVector {
    pub cs: u8,
    pub ds: u8,
    pub ip: u16,
}

impl InterruptVector {
    pub const fn new(cs: u8, ds: u8, ip: u16) -> Self {
        Self { cs, ds, ip }
    }

    /// Decode a record read as one little-endian 32-bit word
    ///
    /// # Example
    ///
    /// ```
    /// use corvid::core::interrupt::InterruptVector;
    ///
    /// let vector = InterruptVector::from_raw(0x1234_0201);
    /// assert_eq!(vector, InterruptVector::new(0x01, 0x02, 0x1234));
    /// ```
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            cs: raw as u8,
            ds: (raw >> 8) as u8,
            ip: (raw >> 16) as u16,
        }
    }

    /// Encode as one little-endian 32-bit word
    pub const fn to_raw(self) -> u32 {
        (self.cs as u32) | ((self.ds as u32) << 8) | ((self.ip as u32) << 16)
    }
}

impl fmt::Display for InterruptVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CS=0x{:02X} DS=0x{:02X} IP=0x{:04X}", self.cs, self.ds, self.ip)
    }
}

/// Host-side handler invoked synchronously by `INT`
///
/// The handler runs in the calling core's current privilege context with no
/// register save or restore around it. By convention `R0` carries the
/// operation code in and the status out.
pub trait VirtualInterrupt: Send + Sync {
    /// Service the interrupt on `core`
    fn run(&self, core: &mut CPUCore) -> Result<()>;

    /// Name for logging
    fn name(&self) -> &str {
        "virtual interrupt"
    }
}

/// Virtual interrupt handlers by software interrupt index
///
/// Built once while the machine is being assembled, then shared read-only by
/// every core through an `Arc`.
#[derive(Default)]
pub struct VirtualInterruptTable {
    handlers: HashMap<u8, Arc<dyn VirtualInterrupt>>,
}

impl VirtualInterruptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for software interrupt `index`
    ///
    /// # Errors
    ///
    /// - `ResourceNotFound` if `index` is outside the vector table
    /// - `ResourceConflict` if a handler is already registered
    pub fn register(&mut self, index: u8, handler: Arc<dyn VirtualInterrupt>) -> Result<()> {
        if usize::from(index) >= VECTOR_COUNT {
            return Err(EmulatorError::ResourceNotFound(format!(
                "software interrupt {}",
                index
            )));
        }
        if let Some(existing) = self.handlers.get(&index) {
            return Err(EmulatorError::ResourceConflict(format!(
                "software interrupt {} is already handled by {}",
                index,
                existing.name()
            )));
        }
        log::debug!("Virtual interrupt {} -> {}", index, handler.name());
        self.handlers.insert(index, handler);
        Ok(())
    }

    /// Handler for `index`, if any
    pub fn get(&self, index: u8) -> Option<Arc<dyn VirtualInterrupt>> {
        self.handlers.get(&index).cloned()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests;
