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

use super::super::decode::{Condition, Imm, Operand, Reg};
use super::super::{CPUCore, Flags, FrameKind};
use crate::core::error::Result;

impl CPUCore {
    // === Control Flow ===

    /// Relative targets are added to the already advanced IP; register
    /// targets are absolute.
    fn jump(&mut self, target: Operand) -> Result<()> {
        self.regs.ip = match target {
            Operand::Imm(offset) => self.regs.ip.wrapping_add(offset as u16),
            Operand::Reg(index) => self.gpr(index)?,
        };
        Ok(())
    }

    pub(super) fn op_j(&mut self, ops: Imm) -> Result<()> {
        self.jump(ops.operand)
    }

    pub(super) fn op_branch(&mut self, condition: Condition, ops: Imm) -> Result<()> {
        let flags = self.regs.flags;
        let e = flags.contains(Flags::EQUAL);
        let z = flags.contains(Flags::ZERO);
        let s = flags.contains(Flags::SIGN);

        let taken = match condition {
            Condition::Equal => e,
            Condition::NotEqual => !e,
            Condition::Zero => z,
            Condition::NotZero => !z,
            Condition::Sign => s,
            Condition::NotSign => !s,
            Condition::Greater => !e && !s,
            Condition::GreaterEqual => e || !s,
            Condition::Less => !e && s,
            Condition::LessEqual => e || s,
        };
        if taken {
            self.jump(ops.operand)?;
        }
        Ok(())
    }

    /// CALL: push IP and FP, open a frame, jump within the code segment
    pub(super) fn op_call(&mut self, ops: Imm) -> Result<()> {
        // Resolve a register target before the frame pushes touch SP
        let target = match ops.operand {
            Operand::Imm(offset) => self.regs.ip.wrapping_add(offset as u16),
            Operand::Reg(index) => self.gpr(index)?,
        };
        self.create_frame(FrameKind::Call, self.regs.cs)?;
        self.regs.ip = target;
        Ok(())
    }

    pub(super) fn op_push(&mut self, ops: Imm) -> Result<()> {
        let value = self.operand(ops.operand)?;
        self.push(value)
    }

    pub(super) fn op_pop(&mut self, ops: Reg) -> Result<()> {
        let value = self.pop()?;
        self.set_gpr(ops.reg, value)
    }
}
