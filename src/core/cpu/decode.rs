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

//! Instruction decoding and encoding
//!
//! Every instruction is one 32-bit word. Bits `[5:0]` hold the opcode; the
//! opcode fixes the operand format:
//!
//! ```text
//! Format  Fields
//! None    -
//! R       reg [11:6]
//! I       is_reg [6]; reg [12:7] | imm20 [26:7]
//! RI      reg [11:6]; is_reg [12]; reg2 [18:13] | imm19 [31:13]
//! RR      reg1 [11:6]; reg2 [17:12]
//! RA      reg [11:6]; base [17:12]; offset14 [31:18]
//! RRR     reg1 [11:6]; reg2 [17:12]; reg3 [23:18]
//! ```
//!
//! Immediates and offsets are two's complement and sign-extended.
//!
//! # Example
//!
//! ```
//! use corvid::core::cpu::decode::{Instruction, Operand, RegImm};
//!
//! let li = Instruction::Li(RegImm { reg: 0, operand: Operand::Imm(5) });
//! let word = li.encode();
//! assert_eq!(Instruction::decode(word).unwrap(), li);
//! ```

use crate::core::error::{EmulatorError, Result};

/// Operand encoding shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    None,
    R,
    I,
    RI,
    RR,
    RA,
    RRR,
}

/// Opcode numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Lw = 1,
    Lb = 2,
    Li = 3,
    Stw = 4,
    Stb = 5,
    Mov = 6,
    Swp = 7,
    Cas = 8,
    Int = 9,
    Retint = 10,
    Call = 11,
    Ret = 12,
    Cli = 13,
    Sti = 14,
    Hlt = 15,
    Rst = 16,
    Idle = 17,
    Push = 18,
    Pop = 19,
    Inc = 20,
    Dec = 21,
    Add = 22,
    Sub = 23,
    Mul = 24,
    Div = 25,
    Mod = 26,
    And = 27,
    Or = 28,
    Xor = 29,
    Not = 30,
    Shiftl = 31,
    Shiftr = 32,
    Cmp = 33,
    Cmpu = 34,
    J = 35,
    Be = 36,
    Bne = 37,
    Bz = 38,
    Bnz = 39,
    Bs = 40,
    Bns = 41,
    Bg = 42,
    Bge = 43,
    Bl = 44,
    Ble = 45,
    In = 46,
    Inb = 47,
    Out = 48,
    Outb = 49,
}

impl Opcode {
    const ALL: [Opcode; 50] = [
        Opcode::Nop,
        Opcode::Lw,
        Opcode::Lb,
        Opcode::Li,
        Opcode::Stw,
        Opcode::Stb,
        Opcode::Mov,
        Opcode::Swp,
        Opcode::Cas,
        Opcode::Int,
        Opcode::Retint,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Cli,
        Opcode::Sti,
        Opcode::Hlt,
        Opcode::Rst,
        Opcode::Idle,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Inc,
        Opcode::Dec,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Not,
        Opcode::Shiftl,
        Opcode::Shiftr,
        Opcode::Cmp,
        Opcode::Cmpu,
        Opcode::J,
        Opcode::Be,
        Opcode::Bne,
        Opcode::Bz,
        Opcode::Bnz,
        Opcode::Bs,
        Opcode::Bns,
        Opcode::Bg,
        Opcode::Bge,
        Opcode::Bl,
        Opcode::Ble,
        Opcode::In,
        Opcode::Inb,
        Opcode::Out,
        Opcode::Outb,
    ];

    /// Look up an opcode number
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// Operand format of this opcode
    pub const fn format(self) -> Format {
        use Opcode::*;
        match self {
            Nop | Retint | Ret | Cli | Sti | Rst | Idle => Format::None,
            Pop | Inc | Dec | Not => Format::R,
            Int | Call | Hlt | Push | J | Be | Bne | Bz | Bnz | Bs | Bns | Bg | Bge | Bl
            | Ble => Format::I,
            Li | Add | Sub | Mul | Div | Mod | And | Or | Xor | Shiftl | Shiftr | Cmp | Cmpu
            | In | Inb | Out | Outb => Format::RI,
            Mov | Swp => Format::RR,
            Lw | Lb | Stw | Stb => Format::RA,
            Cas => Format::RRR,
        }
    }

    /// Assembly mnemonic
    pub const fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Lw => "lw",
            Lb => "lb",
            Li => "li",
            Stw => "stw",
            Stb => "stb",
            Mov => "mov",
            Swp => "swp",
            Cas => "cas",
            Int => "int",
            Retint => "retint",
            Call => "call",
            Ret => "ret",
            Cli => "cli",
            Sti => "sti",
            Hlt => "hlt",
            Rst => "rst",
            Idle => "idle",
            Push => "push",
            Pop => "pop",
            Inc => "inc",
            Dec => "dec",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Shiftl => "shiftl",
            Shiftr => "shiftr",
            Cmp => "cmp",
            Cmpu => "cmpu",
            J => "j",
            Be => "be",
            Bne => "bne",
            Bz => "bz",
            Bnz => "bnz",
            Bs => "bs",
            Bns => "bns",
            Bg => "bg",
            Bge => "bge",
            Bl => "bl",
            Ble => "ble",
            In => "in",
            Inb => "inb",
            Out => "out",
            Outb => "outb",
        }
    }
}

/// Register-or-immediate operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(u8),
    Imm(i32),
}

/// `R` operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg {
    pub reg: u8,
}

/// `I` operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Imm {
    pub operand: Operand,
}

/// `RI` operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegImm {
    pub reg: u8,
    pub operand: Operand,
}

/// `RR` operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegReg {
    pub reg1: u8,
    pub reg2: u8,
}

/// `RA` operands: `reg`, `[base + offset]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAddr {
    pub reg: u8,
    pub base: u8,
    pub offset: i16,
}

/// `RRR` operands of `CAS [addr], expected, new`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegRegReg {
    pub reg1: u8,
    pub reg2: u8,
    pub reg3: u8,
}

/// Branch conditions, tested against FLAGS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    Zero,
    NotZero,
    Sign,
    NotSign,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl Condition {
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Equal => Opcode::Be,
            Self::NotEqual => Opcode::Bne,
            Self::Zero => Opcode::Bz,
            Self::NotZero => Opcode::Bnz,
            Self::Sign => Opcode::Bs,
            Self::NotSign => Opcode::Bns,
            Self::Greater => Opcode::Bg,
            Self::GreaterEqual => Opcode::Bge,
            Self::Less => Opcode::Bl,
            Self::LessEqual => Opcode::Ble,
        }
    }
}

/// Decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Lw(RegAddr),
    Lb(RegAddr),
    Li(RegImm),
    Stw(RegAddr),
    Stb(RegAddr),
    Mov(RegReg),
    Swp(RegReg),
    Cas(RegRegReg),
    Int(Imm),
    Retint,
    Call(Imm),
    Ret,
    Cli,
    Sti,
    Hlt(Imm),
    Rst,
    Idle,
    Push(Imm),
    Pop(Reg),
    Inc(Reg),
    Dec(Reg),
    Add(RegImm),
    Sub(RegImm),
    Mul(RegImm),
    Div(RegImm),
    Mod(RegImm),
    And(RegImm),
    Or(RegImm),
    Xor(RegImm),
    Not(Reg),
    Shiftl(RegImm),
    Shiftr(RegImm),
    Cmp(RegImm),
    Cmpu(RegImm),
    J(Imm),
    Branch(Condition, Imm),
    In(RegImm),
    Inb(RegImm),
    Out(RegImm),
    Outb(RegImm),
}

#[inline(always)]
fn field(word: u32, low: u32, width: u32) -> u32 {
    (word >> low) & ((1 << width) - 1)
}

#[inline(always)]
fn sign_extend(value: u32, width: u32) -> i32 {
    let shift = 32 - width;
    ((value << shift) as i32) >> shift
}

#[inline(always)]
fn pack(value: u32, low: u32, width: u32) -> u32 {
    (value & ((1 << width) - 1)) << low
}

fn decode_r(word: u32) -> Reg {
    Reg {
        reg: field(word, 6, 6) as u8,
    }
}

fn decode_i(word: u32) -> Imm {
    let operand = if field(word, 6, 1) != 0 {
        Operand::Reg(field(word, 7, 6) as u8)
    } else {
        Operand::Imm(sign_extend(field(word, 7, 20), 20))
    };
    Imm { operand }
}

fn decode_ri(word: u32) -> RegImm {
    let operand = if field(word, 12, 1) != 0 {
        Operand::Reg(field(word, 13, 6) as u8)
    } else {
        Operand::Imm(sign_extend(field(word, 13, 19), 19))
    };
    RegImm {
        reg: field(word, 6, 6) as u8,
        operand,
    }
}

fn decode_rr(word: u32) -> RegReg {
    RegReg {
        reg1: field(word, 6, 6) as u8,
        reg2: field(word, 12, 6) as u8,
    }
}

fn decode_ra(word: u32) -> RegAddr {
    RegAddr {
        reg: field(word, 6, 6) as u8,
        base: field(word, 12, 6) as u8,
        offset: sign_extend(field(word, 18, 14), 14) as i16,
    }
}

fn decode_rrr(word: u32) -> RegRegReg {
    RegRegReg {
        reg1: field(word, 6, 6) as u8,
        reg2: field(word, 12, 6) as u8,
        reg3: field(word, 18, 6) as u8,
    }
}

impl Instruction {
    /// Decode one instruction word
    ///
    /// # Errors
    ///
    /// `InvalidOpcode` if bits `[5:0]` name no opcode.
    pub fn decode(word: u32) -> Result<Self> {
        let raw = (word & 0x3F) as u8;
        let opcode = Opcode::from_u8(raw).ok_or(EmulatorError::InvalidOpcode {
            opcode: raw,
            instruction: word,
        })?;

        use Opcode as O;
        Ok(match opcode {
            O::Nop => Self::Nop,
            O::Lw => Self::Lw(decode_ra(word)),
            O::Lb => Self::Lb(decode_ra(word)),
            O::Li => Self::Li(decode_ri(word)),
            O::Stw => Self::Stw(decode_ra(word)),
            O::Stb => Self::Stb(decode_ra(word)),
            O::Mov => Self::Mov(decode_rr(word)),
            O::Swp => Self::Swp(decode_rr(word)),
            O::Cas => Self::Cas(decode_rrr(word)),
            O::Int => Self::Int(decode_i(word)),
            O::Retint => Self::Retint,
            O::Call => Self::Call(decode_i(word)),
            O::Ret => Self::Ret,
            O::Cli => Self::Cli,
            O::Sti => Self::Sti,
            O::Hlt => Self::Hlt(decode_i(word)),
            O::Rst => Self::Rst,
            O::Idle => Self::Idle,
            O::Push => Self::Push(decode_i(word)),
            O::Pop => Self::Pop(decode_r(word)),
            O::Inc => Self::Inc(decode_r(word)),
            O::Dec => Self::Dec(decode_r(word)),
            O::Add => Self::Add(decode_ri(word)),
            O::Sub => Self::Sub(decode_ri(word)),
            O::Mul => Self::Mul(decode_ri(word)),
            O::Div => Self::Div(decode_ri(word)),
            O::Mod => Self::Mod(decode_ri(word)),
            O::And => Self::And(decode_ri(word)),
            O::Or => Self::Or(decode_ri(word)),
            O::Xor => Self::Xor(decode_ri(word)),
            O::Not => Self::Not(decode_r(word)),
            O::Shiftl => Self::Shiftl(decode_ri(word)),
            O::Shiftr => Self::Shiftr(decode_ri(word)),
            O::Cmp => Self::Cmp(decode_ri(word)),
            O::Cmpu => Self::Cmpu(decode_ri(word)),
            O::J => Self::J(decode_i(word)),
            O::In => Self::In(decode_ri(word)),
            O::Inb => Self::Inb(decode_ri(word)),
            O::Out => Self::Out(decode_ri(word)),
            O::Outb => Self::Outb(decode_ri(word)),
            O::Be => Self::Branch(Condition::Equal, decode_i(word)),
            O::Bne => Self::Branch(Condition::NotEqual, decode_i(word)),
            O::Bz => Self::Branch(Condition::Zero, decode_i(word)),
            O::Bnz => Self::Branch(Condition::NotZero, decode_i(word)),
            O::Bs => Self::Branch(Condition::Sign, decode_i(word)),
            O::Bns => Self::Branch(Condition::NotSign, decode_i(word)),
            O::Bg => Self::Branch(Condition::Greater, decode_i(word)),
            O::Bge => Self::Branch(Condition::GreaterEqual, decode_i(word)),
            O::Bl => Self::Branch(Condition::Less, decode_i(word)),
            O::Ble => Self::Branch(Condition::LessEqual, decode_i(word)),
        })
    }

    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        use Instruction as I;
        match self {
            I::Nop => Opcode::Nop,
            I::Lw(_) => Opcode::Lw,
            I::Lb(_) => Opcode::Lb,
            I::Li(_) => Opcode::Li,
            I::Stw(_) => Opcode::Stw,
            I::Stb(_) => Opcode::Stb,
            I::Mov(_) => Opcode::Mov,
            I::Swp(_) => Opcode::Swp,
            I::Cas(_) => Opcode::Cas,
            I::Int(_) => Opcode::Int,
            I::Retint => Opcode::Retint,
            I::Call(_) => Opcode::Call,
            I::Ret => Opcode::Ret,
            I::Cli => Opcode::Cli,
            I::Sti => Opcode::Sti,
            I::Hlt(_) => Opcode::Hlt,
            I::Rst => Opcode::Rst,
            I::Idle => Opcode::Idle,
            I::Push(_) => Opcode::Push,
            I::Pop(_) => Opcode::Pop,
            I::Inc(_) => Opcode::Inc,
            I::Dec(_) => Opcode::Dec,
            I::Add(_) => Opcode::Add,
            I::Sub(_) => Opcode::Sub,
            I::Mul(_) => Opcode::Mul,
            I::Div(_) => Opcode::Div,
            I::Mod(_) => Opcode::Mod,
            I::And(_) => Opcode::And,
            I::Or(_) => Opcode::Or,
            I::Xor(_) => Opcode::Xor,
            I::Not(_) => Opcode::Not,
            I::Shiftl(_) => Opcode::Shiftl,
            I::Shiftr(_) => Opcode::Shiftr,
            I::Cmp(_) => Opcode::Cmp,
            I::Cmpu(_) => Opcode::Cmpu,
            I::J(_) => Opcode::J,
            I::Branch(condition, _) => condition.opcode(),
            I::In(_) => Opcode::In,
            I::Inb(_) => Opcode::Inb,
            I::Out(_) => Opcode::Out,
            I::Outb(_) => Opcode::Outb,
        }
    }

    /// Encode into an instruction word
    ///
    /// Register numbers are truncated to 6 bits and immediates to their field
    /// width.
    pub fn encode(&self) -> u32 {
        use Instruction as I;

        let r = |op: &Reg| pack(u32::from(op.reg), 6, 6);
        let i = |op: &Imm| match op.operand {
            Operand::Reg(reg) => pack(1, 6, 1) | pack(u32::from(reg), 7, 6),
            Operand::Imm(imm) => pack(imm as u32, 7, 20),
        };
        let ri = |op: &RegImm| {
            pack(u32::from(op.reg), 6, 6)
                | match op.operand {
                    Operand::Reg(reg) => pack(1, 12, 1) | pack(u32::from(reg), 13, 6),
                    Operand::Imm(imm) => pack(imm as u32, 13, 19),
                }
        };
        let rr = |op: &RegReg| pack(u32::from(op.reg1), 6, 6) | pack(u32::from(op.reg2), 12, 6);
        let ra = |op: &RegAddr| {
            pack(u32::from(op.reg), 6, 6)
                | pack(u32::from(op.base), 12, 6)
                | pack(op.offset as u32, 18, 14)
        };
        let rrr = |op: &RegRegReg| {
            pack(u32::from(op.reg1), 6, 6)
                | pack(u32::from(op.reg2), 12, 6)
                | pack(u32::from(op.reg3), 18, 6)
        };

        let operands = match self {
            I::Nop | I::Retint | I::Ret | I::Cli | I::Sti | I::Rst | I::Idle => 0,
            I::Pop(op) | I::Inc(op) | I::Dec(op) | I::Not(op) => r(op),
            I::Int(op) | I::Call(op) | I::Hlt(op) | I::Push(op) | I::J(op) | I::Branch(_, op) => {
                i(op)
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
            | I::Outb(op) => ri(op),
            I::Mov(op) | I::Swp(op) => rr(op),
            I::Lw(op) | I::Lb(op) | I::Stw(op) | I::Stb(op) => ra(op),
            I::Cas(op) => rrr(op),
        };
        operands | self.opcode() as u32
    }
}

/// Decode one instruction word
pub fn decode(word: u32) -> Result<Instruction> {
    Instruction::decode(word)
}
