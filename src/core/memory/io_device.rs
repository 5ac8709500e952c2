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

//! I/O port bus
//!
//! Devices attach to numbered I/O ports by implementing [`PortHandler`] and
//! registering with a [`PortBus`]. The CPU's `IN`/`INB`/`OUT`/`OUTB`
//! instructions go through the bus, which knows nothing about specific
//! devices.
//!
//! ```text
//! ┌──────────────┐  IN / OUT   ┌─────────────────────────────┐
//! │   CPU core   │ ──────────▶ │ PortBus                     │
//! └──────────────┘             │  port -> Arc<dyn PortHandler>│
//!                              └──────────────┬──────────────┘
//!                                 ┌───────────┴──────────┐
//!                                 ▼                      ▼
//!                           ┌──────────┐          ┌──────────┐
//!                           │   TTY    │          │  device  │
//!                           └──────────┘          └──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use corvid::core::error::Result;
//! use corvid::core::memory::{PortBus, PortHandler};
//! use std::sync::atomic::{AtomicU16, Ordering};
//! use std::sync::Arc;
//!
//! struct Latch(AtomicU16);
//!
//! impl PortHandler for Latch {
//!     fn read_u8(&self, _port: u16) -> Result<u8> {
//!         Ok(self.0.load(Ordering::Relaxed) as u8)
//!     }
//!
//!     fn write_u8(&self, _port: u16, value: u8) -> Result<()> {
//!         self.0.store(u16::from(value), Ordering::Relaxed);
//!         Ok(())
//!     }
//! }
//!
//! let bus = PortBus::new();
//! bus.register(0x10, Arc::new(Latch(AtomicU16::new(0)))).unwrap();
//! bus.write_u8(0x10, 42, false).unwrap();
//! assert_eq!(bus.read_u8(0x10, false).unwrap(), 42);
//! assert!(bus.read_u8(0x11, false).is_err());
//! ```

use crate::core::error::{EmulatorError, Result};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Trait for devices attached to I/O ports
///
/// Handlers are shared by every core, so they take `&self` and keep their
/// mutable state behind their own synchronization.
///
/// Implementations must provide the 8-bit methods; the 16-bit methods
/// default to zero-extending / truncating through them.
pub trait PortHandler: Send + Sync {
    /// Read a byte from `port`
    fn read_u8(&self, port: u16) -> Result<u8>;

    /// Write a byte to `port`
    fn write_u8(&self, port: u16, value: u8) -> Result<()>;

    /// Read a 16-bit value from `port`
    fn read_u16(&self, port: u16) -> Result<u16> {
        Ok(u16::from(self.read_u8(port)?))
    }

    /// Write a 16-bit value to `port`
    fn write_u16(&self, port: u16, value: u16) -> Result<()> {
        self.write_u8(port, value as u8)
    }

    /// Whether only privileged code may access this device
    fn is_protected(&self) -> bool {
        false
    }

    /// Device name for logging
    fn name(&self) -> &str {
        "Unknown Device"
    }
}

/// Registry of port handlers
#[derive(Default)]
pub struct PortBus {
    handlers: RwLock<HashMap<u16, Arc<dyn PortHandler>>>,
}

impl PortBus {
    /// Create an empty port bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to `port`
    ///
    /// # Errors
    ///
    /// `ResourceConflict` if the port already has a handler.
    pub fn register(&self, port: u16, handler: Arc<dyn PortHandler>) -> Result<()> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = handlers.get(&port) {
            return Err(EmulatorError::ResourceConflict(format!(
                "port 0x{:04X} is already claimed by {}",
                port,
                existing.name()
            )));
        }
        log::debug!("Port 0x{:04X} -> {}", port, handler.name());
        handlers.insert(port, handler);
        Ok(())
    }

    /// Detach the handler on `port`
    pub fn unregister(&self, port: u16) -> Result<()> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&port)
            .map(|_| ())
            .ok_or_else(|| EmulatorError::ResourceNotFound(format!("port 0x{:04X}", port)))
    }

    /// Look up the handler for `port`, enforcing protection
    fn handler(&self, port: u16, privileged: bool) -> Result<Arc<dyn PortHandler>> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&port)
            .cloned()
            .ok_or_else(|| EmulatorError::ResourceNotFound(format!("port 0x{:04X}", port)))?;

        if handler.is_protected() && !privileged {
            return Err(EmulatorError::AccessViolation(format!(
                "unprivileged access to protected port 0x{:04X} ({})",
                port,
                handler.name()
            )));
        }
        Ok(handler)
    }

    pub fn read_u8(&self, port: u16, privileged: bool) -> Result<u8> {
        self.handler(port, privileged)?.read_u8(port)
    }

    pub fn read_u16(&self, port: u16, privileged: bool) -> Result<u16> {
        self.handler(port, privileged)?.read_u16(port)
    }

    pub fn write_u8(&self, port: u16, value: u8, privileged: bool) -> Result<()> {
        self.handler(port, privileged)?.write_u8(port, value)
    }

    pub fn write_u16(&self, port: u16, value: u16, privileged: bool) -> Result<()> {
        self.handler(port, privileged)?.write_u16(port, value)
    }
}

/// Well-known port numbers
pub mod ports {
    /// Console output ([`super::TtyPort`])
    pub const CONSOLE: u16 = 1;
}

/// Write-only character output port
///
/// Every byte written is forwarded to the wrapped writer. Reads return 0.
pub struct TtyPort<W: Write + Send> {
    output: Mutex<W>,
}

impl<W: Write + Send> TtyPort<W> {
    pub fn new(output: W) -> Self {
        Self {
            output: Mutex::new(output),
        }
    }

    /// Consume the port and return the writer
    pub fn into_inner(self) -> W {
        self.output.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> PortHandler for TtyPort<W> {
    fn read_u8(&self, _port: u16) -> Result<u8> {
        Ok(0)
    }

    fn write_u8(&self, _port: u16, value: u8) -> Result<()> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output.write_all(&[value])?;
        if value == b'\n' {
            output.flush()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tty"
    }
}
