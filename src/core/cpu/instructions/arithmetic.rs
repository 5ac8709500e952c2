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
use crate::core::error::{EmulatorError, Result};

impl CPUCore {
    // === Arithmetic Instructions ===

    /// INC: O on wrap from 0xFFFF, Z/S from the result
    pub(super) fn op_inc(&mut self, ops: Reg) -> Result<()> {
        let a = self.gpr(ops.reg)?;
        let result = a.wrapping_add(1);
        self.set_gpr(ops.reg, result)?;
        self.regs.set_zs(result);
        self.regs.flags.set(Flags::OVERFLOW, a == 0xFFFF);
        Ok(())
    }

    /// DEC: S on wrap from 0, Z from the result
    pub(super) fn op_dec(&mut self, ops: Reg) -> Result<()> {
        let a = self.gpr(ops.reg)?;
        let result = a.wrapping_sub(1);
        self.set_gpr(ops.reg, result)?;
        self.regs.flags.set(Flags::ZERO, result == 0);
        self.regs.flags.set(Flags::SIGN, a == 0);
        self.regs.flags.remove(Flags::OVERFLOW);
        Ok(())
    }

    /// ADD: O iff the unsigned sum needs 17 bits
    pub(super) fn op_add(&mut self, ops: RegImm) -> Result<()> {
        let a = self.gpr(ops.reg)?;
        let b = self.operand(ops.operand)?;
        let (result, carry) = a.overflowing_add(b);
        self.set_gpr(ops.reg, result)?;
        self.regs.set_zs(result);
        self.regs.flags.set(Flags::OVERFLOW, carry);
        Ok(())
    }

    /// SUB: S iff the operand exceeds the destination (unsigned borrow)
    pub(super) fn op_sub(&mut self, ops: RegImm) -> Result<()> {
        let a = self.gpr(ops.reg)?;
        let b = self.operand(ops.operand)?;
        let result = a.wrapping_sub(b);
        self.set_gpr(ops.reg, result)?;
        self.regs.flags.set(Flags::ZERO, result == 0);
        self.regs.flags.set(Flags::SIGN, b > a);
        self.regs.flags.remove(Flags::OVERFLOW);
        Ok(())
    }

    /// MUL: signed, O if the product does not fit in i16
    pub(super) fn op_mul(&mut self, ops: RegImm) -> Result<()> {
        let a = self.gpr(ops.reg)? as i16;
        let b = self.operand(ops.operand)? as i16;
        let product = i32::from(a) * i32::from(b);
        let result = product as u16;
        self.set_gpr(ops.reg, result)?;
        self.regs.set_zs(result);
        self.regs
            .flags
            .set(Flags::OVERFLOW, i16::try_from(product).is_err());
        Ok(())
    }

    /// Signed divisor of a DIV/MOD, faulting on zero
    fn divisor(&self, ops: RegImm) -> Result<(i16, i16)> {
        let a = self.gpr(ops.reg)? as i16;
        let b = self.operand(ops.operand)? as i16;
        if b == 0 {
            return Err(EmulatorError::ArithmeticFault("division by zero"));
        }
        Ok((a, b))
    }

    /// DIV: signed quotient; `i16::MIN / -1` wraps
    pub(super) fn op_div(&mut self, ops: RegImm) -> Result<()> {
        let (a, b) = self.divisor(ops)?;
        self.store_quotient(ops.reg, a.wrapping_div(b) as u16)
    }

    /// MOD: signed remainder, sign follows the dividend
    pub(super) fn op_mod(&mut self, ops: RegImm) -> Result<()> {
        let (a, b) = self.divisor(ops)?;
        self.store_quotient(ops.reg, a.wrapping_rem(b) as u16)
    }

    fn store_quotient(&mut self, reg: u8, result: u16) -> Result<()> {
        self.set_gpr(reg, result)?;
        self.regs.set_zs(result);
        self.regs.flags.remove(Flags::OVERFLOW);
        Ok(())
    }
}
