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

use super::super::decode::{Reg, RegImm};
use super::super::{CPUCore, Flags};
use crate::core::error::Result;

impl CPUCore {
    // === Bitwise Instructions ===
    // Z/S follow the result; O is left alone.

    fn bitwise(&mut self, ops: RegImm, f: impl FnOnce(u16, u16) -> u16) -> Result<()> {
        let a = self.gpr(ops.reg)?;
        let b = self.operand(ops.operand)?;
        let result = f(a, b);
        self.set_gpr(ops.reg, result)?;
        self.regs.set_zs(result);
        Ok(())
    }

    pub(super) fn op_and(&mut self, ops: RegImm) -> Result<()> {
        self.bitwise(ops, |a, b| a & b)
    }

    pub(super) fn op_or(&mut self, ops: RegImm) -> Result<()> {
        self.bitwise(ops, |a, b| a | b)
    }

    pub(super) fn op_xor(&mut self, ops: RegImm) -> Result<()> {
        self.bitwise(ops, |a, b| a ^ b)
    }

    pub(super) fn op_not(&mut self, ops: Reg) -> Result<()> {
        let result = !self.gpr(ops.reg)?;
        self.set_gpr(ops.reg, result)?;
        self.regs.set_zs(result);
        Ok(())
    }

    /// SHIFTL: logical left shift, 0 for counts of 16 and above
    pub(super) fn op_shiftl(&mut self, ops: RegImm) -> Result<()> {
        self.bitwise(ops, |a, n| a.checked_shl(u32::from(n)).unwrap_or(0))
    }

    /// SHIFTR: logical right shift, 0 for counts of 16 and above
    pub(super) fn op_shiftr(&mut self, ops: RegImm) -> Result<()> {
        self.bitwise(ops, |a, n| a.checked_shr(u32::from(n)).unwrap_or(0))
    }

    // === Compare Instructions ===

    fn compare(&mut self, a: u16, b: u16, less: bool) {
        let flags = &mut self.regs.flags;
        flags.set(Flags::EQUAL, a == b);
        flags.set(Flags::ZERO, a == 0 && b == 0);
        flags.set(Flags::SIGN, less);
    }

    /// CMP: signed compare
    pub(super) fn op_cmp(&mut self, ops: RegImm) -> Result<()> {
        let a = self.gpr(ops.reg)?;
        let b = self.operand(ops.operand)?;
        self.compare(a, b, (a as i16) < (b as i16));
        Ok(())
    }

    /// CMPU: unsigned compare
    pub(super) fn op_cmpu(&mut self, ops: RegImm) -> Result<()> {
        let a = self.gpr(ops.reg)?;
        let b = self.operand(ops.operand)?;
        self.compare(a, b, a < b);
        Ok(())
    }
}
