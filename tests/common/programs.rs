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

//! Small test programs

use super::fixtures::DATA;
use corvid::core::cpu::decode::{
    Condition, Imm, Instruction as I, Operand, Reg, RegAddr, RegImm, RegReg, RegRegReg,
};
use corvid::core::cpu::reg;
use corvid::core::memory::ports;

fn li(reg: u8, value: i32) -> I {
    I::Li(RegImm { reg, operand: Operand::Imm(value) })
}

fn hlt_reg(reg: u8) -> I {
    I::Hlt(Imm { operand: Operand::Reg(reg) })
}

/// `5 - 3`, exit code 2
#[allow(dead_code)]
pub fn subtraction() -> Vec<I> {
    vec![
        li(1, 5),
        I::Sub(RegImm { reg: 1, operand: Operand::Imm(3) }),
        hlt_reg(1),
    ]
}

/// Divides by zero, so the core faults
#[allow(dead_code)]
pub fn division_by_zero() -> Vec<I> {
    vec![
        li(1, 5),
        li(2, 0),
        I::Div(RegImm { reg: 1, operand: Operand::Reg(2) }),
        hlt_reg(1),
    ]
}

/// Drops privilege through FLAGS, then tries `CLI`
#[allow(dead_code)]
pub fn protected_instruction() -> Vec<I> {
    vec![
        // HWINT only
        li(1, 2),
        I::Mov(RegReg { reg1: reg::FLAGS, reg2: 1 }),
        I::Cli,
        hlt_reg(0),
    ]
}

/// Sum 1..=10 with a counted loop, exit code 55
#[allow(dead_code)]
pub fn sum_loop() -> Vec<I> {
    vec![
        li(1, 0),
        li(2, 10),
        // loop
        I::Add(RegImm { reg: 1, operand: Operand::Reg(2) }),
        I::Dec(Reg { reg: 2 }),
        I::Branch(Condition::NotZero, Imm { operand: Operand::Imm(-12) }),
        hlt_reg(1),
    ]
}

/// Nested call keeping its result on the stack, exit code 12
#[allow(dead_code)]
pub fn call_and_return() -> Vec<I> {
    vec![
        li(1, 3),
        // double r1, twice
        I::Call(Imm { operand: Operand::Imm(8) }),
        I::Call(Imm { operand: Operand::Imm(4) }),
        hlt_reg(1),
        // double:
        I::Add(RegImm { reg: 1, operand: Operand::Reg(1) }),
        I::Ret,
    ]
}

/// Prints `text` to the console port byte by byte, then halts with 0
#[allow(dead_code)]
pub fn print(text: &str) -> Vec<I> {
    let mut program: Vec<I> = text
        .bytes()
        .flat_map(|byte| {
            [
                li(1, i32::from(byte)),
                I::Outb(RegImm { reg: 1, operand: Operand::Imm(i32::from(ports::CONSOLE)) }),
            ]
        })
        .collect();
    program.push(hlt_reg(0));
    program
}

/// Spins until the word at `DATA` reads 1, then halts with 9; the secondary
/// entry sets it with `CAS`
#[allow(dead_code)]
pub fn handshake() -> (Vec<I>, Vec<I>) {
    let cas = I::Cas(RegRegReg { reg1: 1, reg2: 2, reg3: 3 });
    let main = vec![
        li(1, i32::from(DATA)),
        li(2, 1),
        li(3, 1),
        cas,
        I::Branch(Condition::NotEqual, Imm { operand: Operand::Imm(-16) }),
        I::Hlt(Imm { operand: Operand::Imm(9) }),
    ];
    let secondary = vec![
        li(1, i32::from(DATA)),
        li(2, 0),
        li(3, 1),
        cas,
        I::Hlt(Imm { operand: Operand::Imm(3) }),
    ];
    (main, secondary)
}

/// Busy-waits for an IRQ handler at offset 16 to store 42 at `DATA`, then
/// halts with it
#[allow(dead_code)]
pub fn irq_wait() -> Vec<I> {
    let offset = DATA as i16;
    vec![
        I::Lw(RegAddr { reg: 5, base: 0, offset }),
        I::Cmp(RegImm { reg: 5, operand: Operand::Imm(42) }),
        I::Branch(Condition::NotEqual, Imm { operand: Operand::Imm(-12) }),
        hlt_reg(5),
        // handler
        li(2, 42),
        I::Stw(RegAddr { reg: 2, base: 0, offset }),
        I::Retint,
    ]
}
