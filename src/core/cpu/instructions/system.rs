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

use super::super::decode::{Imm, RegImm};
use super::super::{CPUCore, Flags};
use crate::core::error::{EmulatorError, Result};

impl CPUCore {
    // === System Instructions ===

    /// INT: software interrupt
    pub(super) fn op_int(&mut self, ops: Imm) -> Result<()> {
        let index = self.operand(ops.operand)?;
        let index = u8::try_from(index)
            .ok()
            .filter(|&i| usize::from(i) < crate::core::interrupt::VECTOR_COUNT)
            .ok_or_else(|| {
                EmulatorError::CpuException(format!("interrupt {} out of range", index))
            })?;
        self.software_interrupt(index)
    }

    pub(super) fn op_retint(&mut self) -> Result<()> {
        self.require_privileged("retint")?;
        self.exit_interrupt()
    }

    pub(super) fn op_cli(&mut self) -> Result<()> {
        self.require_privileged("cli")?;
        self.regs.flags.remove(Flags::HWINT);
        Ok(())
    }

    pub(super) fn op_sti(&mut self) -> Result<()> {
        self.require_privileged("sti")?;
        self.regs.flags.insert(Flags::HWINT);
        Ok(())
    }

    /// HLT: exit code is the signed operand
    pub(super) fn op_hlt(&mut self, ops: Imm) -> Result<()> {
        self.require_privileged("hlt")?;
        self.exit_code = i32::from(self.operand(ops.operand)? as i16);
        self.halt()
    }

    pub(super) fn op_rst(&mut self) -> Result<()> {
        self.require_privileged("rst")?;
        self.reset();
        Ok(())
    }

    // === Port I/O ===
    // `reg` is the data register, the operand names the port.

    pub(super) fn op_in(&mut self, ops: RegImm) -> Result<()> {
        let port = self.operand(ops.operand)?;
        let value = self.ports.read_u16(port, self.regs.privileged())?;
        self.set_gpr(ops.reg, value)
    }

    pub(super) fn op_inb(&mut self, ops: RegImm) -> Result<()> {
        let port = self.operand(ops.operand)?;
        let value = self.ports.read_u8(port, self.regs.privileged())?;
        self.set_gpr(ops.reg, u16::from(value))
    }

    pub(super) fn op_out(&mut self, ops: RegImm) -> Result<()> {
        let port = self.operand(ops.operand)?;
        let value = self.gpr(ops.reg)?;
        self.ports.write_u16(port, value, self.regs.privileged())
    }

    pub(super) fn op_outb(&mut self, ops: RegImm) -> Result<()> {
        let port = self.operand(ops.operand)?;
        let value = self.gpr(ops.reg)? as u8;
        self.ports.write_u8(port, value, self.regs.privileged())
    }
}
