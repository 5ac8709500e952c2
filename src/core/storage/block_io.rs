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

//! Block I/O virtual interrupt
//!
//! Register convention on `INT ints::BLOCKIO`:
//!
//! | Register | In                    | Out                      |
//! |----------|-----------------------|--------------------------|
//! | R0       | operation (`ops`)     | status (`status`)        |
//! | R1       | device id             | INFO: block count        |
//! | R2       | first block           | INFO: block size         |
//! | R3       | buffer offset in `DS` |                          |
//! | R4       | block count           |                          |
//!
//! The buffer must lie inside the data segment. Guest memory is accessed with
//! the caller's privilege, after the core's cached words over the buffer have
//! been written back and dropped. Protection faults on the buffer are fatal
//! to the core like any other memory fault; device errors are reported in R0.

use super::StorageRegistry;
use crate::core::cpu::CPUCore;
use crate::core::error::{EmulatorError, Result};
use crate::core::interrupt::VirtualInterrupt;
use crate::core::memory::{WriteMode, SEGMENT_SIZE};
use std::sync::Arc;

/// Operation codes in R0
pub mod ops {
    /// Query block count and size
    pub const INFO: u16 = 0;
    pub const READ: u16 = 1;
    pub const WRITE: u16 = 2;
}

/// Status codes returned in R0
pub mod status {
    pub const OK: u16 = 0;
    /// No device with the requested id
    pub const NO_DEVICE: u16 = 1;
    /// Request reaches past the device or the data segment
    pub const OUT_OF_RANGE: u16 = 2;
    /// Unknown operation
    pub const BAD_REQUEST: u16 = 3;
    /// Host I/O failure
    pub const IO_ERROR: u16 = 4;
}

/// Handler for `ints::BLOCKIO`
pub struct BlockIo {
    storage: Arc<StorageRegistry>,
}

struct Request {
    op: u16,
    device: u16,
    block: u16,
    buffer: u16,
    count: u16,
}

impl BlockIo {
    pub fn new(storage: Arc<StorageRegistry>) -> Self {
        Self { storage }
    }

    fn status_of(error: &EmulatorError) -> u16 {
        match error {
            EmulatorError::ResourceNotFound(_) => status::NO_DEVICE,
            EmulatorError::StorageAccess(_) => status::OUT_OF_RANGE,
            _ => status::IO_ERROR,
        }
    }

    fn info(&self, core: &mut CPUCore, request: &Request) -> Result<u16> {
        let (blocks, block_size) = match self.storage.device(request.device) {
            Ok(device) => (device.block_count(), device.block_size()),
            Err(e) => return Ok(Self::status_of(&e)),
        };
        let regs = core.registers_mut();
        regs.set_gpr(1, u16::try_from(blocks).unwrap_or(u16::MAX));
        regs.set_gpr(2, u16::try_from(block_size).unwrap_or(u16::MAX));
        Ok(status::OK)
    }

    /// Buffer length in bytes, if it fits in the data segment
    fn buffer_len(&self, request: &Request) -> Option<usize> {
        let block_size = self.storage.device(request.device).ok()?.block_size();
        let len = block_size * usize::from(request.count);
        (usize::from(request.buffer) + len <= SEGMENT_SIZE as usize).then_some(len)
    }

    fn read(&self, core: &mut CPUCore, request: &Request) -> Result<u16> {
        let Some(len) = self.buffer_len(request) else {
            return Ok(self.missing_or_out_of_range(request));
        };

        let mut data = vec![0u8; len];
        let result = self.storage.device(request.device).and_then(|mut device| {
            device.read_block(u32::from(request.block), &mut data, u32::from(request.count))
        });
        if let Err(e) = result {
            log::debug!("Block read failed: {}", e);
            return Ok(Self::status_of(&e));
        }

        let start = core.data_address(request.buffer);
        core.invalidate_data(start, len as u32)?;
        let mode = if core.registers().privileged() {
            WriteMode::PRIVILEGED
        } else {
            WriteMode::USER
        };
        for (i, &byte) in data.iter().enumerate() {
            core.memory().write_u8(start + i as u32, byte, mode)?;
        }
        Ok(status::OK)
    }

    fn write(&self, core: &mut CPUCore, request: &Request) -> Result<u16> {
        let Some(len) = self.buffer_len(request) else {
            return Ok(self.missing_or_out_of_range(request));
        };

        let start = core.data_address(request.buffer);
        core.invalidate_data(start, len as u32)?;
        let privileged = core.registers().privileged();
        let data = (0..len as u32)
            .map(|i| core.memory().read_u8(start + i, privileged))
            .collect::<Result<Vec<u8>>>()?;

        let result = self.storage.device(request.device).and_then(|mut device| {
            device.write_block(u32::from(request.block), &data, u32::from(request.count))
        });
        match result {
            Ok(()) => Ok(status::OK),
            Err(e) => {
                log::debug!("Block write failed: {}", e);
                Ok(Self::status_of(&e))
            }
        }
    }

    fn missing_or_out_of_range(&self, request: &Request) -> u16 {
        match self.storage.device(request.device) {
            Ok(_) => status::OUT_OF_RANGE,
            Err(_) => status::NO_DEVICE,
        }
    }
}

impl VirtualInterrupt for BlockIo {
    fn run(&self, core: &mut CPUCore) -> Result<()> {
        let regs = core.registers();
        let request = Request {
            op: regs.gpr(0),
            device: regs.gpr(1),
            block: regs.gpr(2),
            buffer: regs.gpr(3),
            count: regs.gpr(4),
        };

        let status = match request.op {
            ops::INFO => self.info(core, &request)?,
            ops::READ => self.read(core, &request)?,
            ops::WRITE => self.write(core, &request)?,
            _ => status::BAD_REQUEST,
        };
        log::trace!(
            "Core {} block I/O op={} dev={} block={} count={} -> {}",
            core.id(),
            request.op,
            request.device,
            request.block,
            request.count,
            status
        );
        core.registers_mut().set_gpr(0, status);
        Ok(())
    }

    fn name(&self) -> &str {
        "block-io"
    }
}
