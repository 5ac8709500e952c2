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

//! Instruction execution
//!
//! `execute` dispatches a decoded instruction to its handler. Handlers are
//! grouped by kind in the submodules below.

use super::decode::{Instruction, Operand};
use super::{CPUCore, FrameKind};
use crate::core::error::{EmulatorError, Result};

mod arithmetic;
mod control;
mod logical;
mod memory;
mod system;

impl CPUCore {
    /// Execute one decoded instruction
    ///
    /// `IP` already points past the instruction.
    pub(super) fn execute(&mut self, instruction: Instruction) -> Result<()> {
        use Instruction as I;
        match instruction {
            I::Nop => Ok(()),

            // Data movement
            I::Lw(ops) => self.op_lw(ops),
            I::Lb(ops) => self.op_lb(ops),
            I::Li(ops) => self.op_li(ops),
            I::Stw(ops) => self.op_stw(ops),
            I::Stb(ops) => self.op_stb(ops),
            I::Mov(ops) => self.op_mov(ops),
            I::Swp(ops) => self.op_swp(ops),
            I::Cas(ops) => self.op_cas(ops),

            // Arithmetic
            I::Inc(ops) => self.op_inc(ops),
            I::Dec(ops) => self.op_dec(ops),
            I::Add(ops) => self.op_add(ops),
            I::Sub(ops) => self.op_sub(ops),
            I::Mul(ops) => self.op_mul(ops),
            I::Div(ops) => self.op_div(ops),
            I::Mod(ops) => self.op_mod(ops),

            // Bitwise and compare
            I::And(ops) => self.op_and(ops),
            I::Or(ops) => self.op_or(ops),
            I::Xor(ops) => self.op_xor(ops),
            I::Not(ops) => self.op_not(ops),
            I::Shiftl(ops) => self.op_shiftl(ops),
            I::Shiftr(ops) => self.op_shiftr(ops),
            I::Cmp(ops) => self.op_cmp(ops),
            I::Cmpu(ops) => self.op_cmpu(ops),

            // Control flow
            I::J(ops) => self.op_j(ops),
            I::Branch(condition, ops) => self.op_branch(condition, ops),
            I::Call(ops) => self.op_call(ops),
            I::Ret => self.destroy_frame(FrameKind::Call),
            I::Push(ops) => self.op_push(ops),
            I::Pop(ops) => self.op_pop(ops),

            // System
            I::Int(ops) => self.op_int(ops),
            I::Retint => self.op_retint(),
            I::Cli => self.op_cli(),
            I::Sti => self.op_sti(),
            I::Hlt(ops) => self.op_hlt(ops),
            I::Rst => self.op_rst(),
            I::Idle => {
                self.set_idle(true);
                Ok(())
            }
            I::In(ops) => self.op_in(ops),
            I::Inb(ops) => self.op_inb(ops),
            I::Out(ops) => self.op_out(ops),
            I::Outb(ops) => self.op_outb(ops),
        }
    }

    // === Operand helpers ===

    /// Read a general purpose register named by an instruction
    #[inline(always)]
    pub(super) fn gpr(&self, index: u8) -> Result<u16> {
        if index >= 32 {
            return Err(EmulatorError::AccessViolation(format!(
                "register {} is only reachable through mov/swp",
                super::Registers::name(index)
            )));
        }
        Ok(self.regs.gpr(index))
    }

    /// Write a general purpose register named by an instruction
    #[inline(always)]
    pub(super) fn set_gpr(&mut self, index: u8, value: u16) -> Result<()> {
        if index >= 32 {
            return Err(EmulatorError::AccessViolation(format!(
                "register {} is only reachable through mov/swp",
                super::Registers::name(index)
            )));
        }
        self.regs.set_gpr(index, value);
        Ok(())
    }

    /// Value of a register-or-immediate operand
    #[inline(always)]
    pub(super) fn operand(&self, operand: Operand) -> Result<u16> {
        match operand {
            Operand::Reg(index) => self.gpr(index),
            Operand::Imm(value) => Ok(value as u16),
        }
    }

    pub(super) fn require_privileged(&self, what: &str) -> Result<()> {
        if self.regs.privileged() {
            Ok(())
        } else {
            Err(EmulatorError::AccessViolation(format!(
                "{} requires privileged mode",
                what
            )))
        }
    }

    /// Push a word onto the data-segment stack
    pub(super) fn push(&mut self, value: u16) -> Result<()> {
        let sp = self.regs.sp.wrapping_sub(2);
        self.dcache.write_u16(self.data_address(sp), value)?;
        self.regs.sp = sp;
        Ok(())
    }

    /// Pop a word off the data-segment stack
    pub(super) fn pop(&mut self) -> Result<u16> {
        let value = self.dcache.read_u16(self.data_address(self.regs.sp))?;
        self.regs.sp = self.regs.sp.wrapping_add(2);
        Ok(value)
    }
}
