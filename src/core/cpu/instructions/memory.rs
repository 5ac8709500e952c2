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

use super::super::decode::{RegAddr, RegImm, RegReg, RegRegReg};
use super::super::{CPUCore, Flags, Registers};
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::{CasOutcome, WriteMode};

impl CPUCore {
    // === Data Movement ===

    /// Flat address of `[base + offset]` in the data segment
    fn effective_address(&self, ops: RegAddr) -> Result<u32> {
        let offset = self.gpr(ops.base)?.wrapping_add(ops.offset as u16);
        Ok(self.data_address(offset))
    }

    /// LW: load word, update Z/S
    pub(super) fn op_lw(&mut self, ops: RegAddr) -> Result<()> {
        let address = self.effective_address(ops)?;
        let value = self.dcache.read_u16(address)?;
        self.set_gpr(ops.reg, value)?;
        self.regs.set_zs(value);
        Ok(())
    }

    /// LB: load zero-extended byte, update Z/S
    ///
    /// Bytes bypass the data cache; the word holding the byte is written
    /// back first.
    pub(super) fn op_lb(&mut self, ops: RegAddr) -> Result<()> {
        let address = self.effective_address(ops)?;
        self.dcache.release(address & !1)?;
        let value = u16::from(self.memory.read_u8(address, false)?);
        self.set_gpr(ops.reg, value)?;
        self.regs.set_zs(value);
        Ok(())
    }

    /// LI: load operand, update Z/S
    pub(super) fn op_li(&mut self, ops: RegImm) -> Result<()> {
        let value = self.operand(ops.operand)?;
        self.set_gpr(ops.reg, value)?;
        self.regs.set_zs(value);
        Ok(())
    }

    pub(super) fn op_stw(&mut self, ops: RegAddr) -> Result<()> {
        let address = self.effective_address(ops)?;
        let value = self.gpr(ops.reg)?;
        self.dcache.write_u16(address, value)
    }

    pub(super) fn op_stb(&mut self, ops: RegAddr) -> Result<()> {
        let address = self.effective_address(ops)?;
        let value = self.gpr(ops.reg)? as u8;
        self.dcache.release(address & !1)?;
        self.memory.write_u8(address, value, WriteMode::USER)
    }

    fn read_any(&self, index: u8) -> Result<u16> {
        if index >= 32 {
            self.require_privileged("access to special registers")?;
        }
        self.regs.get(index).ok_or_else(|| {
            EmulatorError::CpuException(format!("no register with index {}", index))
        })
    }

    fn write_any(&mut self, index: u8, value: u16) -> Result<()> {
        if index >= 32 {
            self.require_privileged("access to special registers")?;
        }
        if self.regs.set(index, value) {
            Ok(())
        } else {
            Err(EmulatorError::CpuException(format!(
                "no register with index {}",
                index
            )))
        }
    }

    /// MOV: `reg1 = reg2`, any register
    pub(super) fn op_mov(&mut self, ops: RegReg) -> Result<()> {
        let value = self.read_any(ops.reg2)?;
        self.write_any(ops.reg1, value)?;
        log::trace!(
            "mov {} <- {} (0x{:04X})",
            Registers::name(ops.reg1),
            Registers::name(ops.reg2),
            value
        );
        Ok(())
    }

    /// SWP: exchange two registers, any register
    pub(super) fn op_swp(&mut self, ops: RegReg) -> Result<()> {
        let a = self.read_any(ops.reg1)?;
        let b = self.read_any(ops.reg2)?;
        self.write_any(ops.reg1, b)?;
        self.write_any(ops.reg2, a)
    }

    /// CAS [reg1], reg2, reg3
    ///
    /// Atomic against every core. Sets E on success; on failure loads the
    /// observed value into `reg2` and clears E.
    pub(super) fn op_cas(&mut self, ops: RegRegReg) -> Result<()> {
        let address = self.data_address(self.gpr(ops.reg1)?);
        let expected = self.gpr(ops.reg2)?;
        let new = self.gpr(ops.reg3)?;

        self.dcache.release(address)?;
        match self.memory.cas_u16(address, expected, new)? {
            CasOutcome::Swapped => self.regs.flags.insert(Flags::EQUAL),
            CasOutcome::Observed(value) => {
                self.set_gpr(ops.reg2, value)?;
                self.regs.flags.remove(Flags::EQUAL);
            }
        }
        Ok(())
    }
}
