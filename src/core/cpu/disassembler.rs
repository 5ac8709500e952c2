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

//! Instruction disassembler for debugging
//!
//! Renders decoded instructions in assembly syntax. Used by fault reports
//! and trace logging.

use super::decode::{Imm, Instruction, Operand, RegAddr, RegImm};
use super::registers::Registers;
use std::fmt;

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => f.write_str(&Registers::name(*reg)),
            Operand::Imm(imm) => write!(f, "{}", imm),
        }
    }
}

fn reg_imm(f: &mut fmt::Formatter<'_>, mnemonic: &str, op: &RegImm) -> fmt::Result {
    write!(f, "{} {}, {}", mnemonic, Registers::name(op.reg), op.operand)
}

fn imm(f: &mut fmt::Formatter<'_>, mnemonic: &str, op: &Imm) -> fmt::Result {
    write!(f, "{} {}", mnemonic, op.operand)
}

fn reg_addr(f: &mut fmt::Formatter<'_>, mnemonic: &str, op: &RegAddr) -> fmt::Result {
    write!(
        f,
        "{} {}, [{}{:+}]",
        mnemonic,
        Registers::name(op.reg),
        Registers::name(op.base),
        op.offset
    )
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction as I;
        let mnemonic = self.opcode().mnemonic();
        match self {
            I::Nop | I::Retint | I::Ret | I::Cli | I::Sti | I::Rst | I::Idle => {
                f.write_str(mnemonic)
            }
            I::Pop(op) | I::Inc(op) | I::Dec(op) | I::Not(op) => {
                write!(f, "{} {}", mnemonic, Registers::name(op.reg))
            }
            I::Int(op) | I::Call(op) | I::Hlt(op) | I::Push(op) | I::J(op) | I::Branch(_, op) => {
                imm(f, mnemonic, op)
            }
            I::Li(op)
            | I::Add(op)
            | I::Sub(op)
            | I::Mul(op)
            | I::Div(op)
            | I::Mod(op)
            | I::And(op)
            | I::Or(op)
            | I::Xor(op)
            | I::Shiftl(op)
            | I::Shiftr(op)
            | I::Cmp(op)
            | I::Cmpu(op)
            | I::In(op)
            | I::Inb(op)
            | I::Out(op)
            | I::Outb(op) => reg_imm(f, mnemonic, op),
            I::Mov(op) | I::Swp(op) => write!(
                f,
                "{} {}, {}",
                mnemonic,
                Registers::name(op.reg1),
                Registers::name(op.reg2)
            ),
            I::Lw(op) | I::Lb(op) | I::Stw(op) | I::Stb(op) => reg_addr(f, mnemonic, op),
            I::Cas(op) => write!(
                f,
                "{} [{}], {}, {}",
                mnemonic,
                Registers::name(op.reg1),
                Registers::name(op.reg2),
                Registers::name(op.reg3)
            ),
        }
    }
}

/// Instruction disassembler
///
/// # Example
/// ```
/// use corvid::core::cpu::Disassembler;
///
/// assert_eq!(Disassembler::disassemble(0x0000_0000), "nop");
/// assert_eq!(Disassembler::disassemble(0x0000_003F), "<invalid 0x0000003F>");
/// ```
pub struct Disassembler;

impl Disassembler {
    /// Disassemble one instruction word
    pub fn disassemble(word: u32) -> String {
        match Instruction::decode(word) {
            Ok(instruction) => instruction.to_string(),
            Err(_) => format!("<invalid 0x{:08X}>", word),
        }
    }

    /// Disassemble a sequence of words starting at `ip`, one line each
    pub fn listing(ip: u16, words: &[u32]) -> Vec<String> {
        words
            .iter()
            .enumerate()
            .map(|(i, &word)| {
                format!(
                    "{:04X}: {:08X}  {}",
                    ip.wrapping_add((i * 4) as u16),
                    word,
                    Self::disassemble(word)
                )
            })
            .collect()
    }
}
