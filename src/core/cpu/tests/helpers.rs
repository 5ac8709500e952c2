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

use crate::core::cpu::decode::{Condition, Imm, Instruction, Operand, Reg, RegAddr, RegImm, RegReg};
use super::*;
use crate::core::config::CpuConfig;
use crate::core::loader::ProgramImage;
use crate::core::memory::SEGMENT_SIZE;

/// Offset of a zeroed read+write scratch area in the program segment
pub const DATA: u16 = 0x1000;

/// Build and boot a core running `program` from offset 0 of segment 1
pub fn core_with(program: &[Instruction], privileged: bool) -> CPUCore {
    build(
        program,
        privileged,
        PortBus::new(),
        VirtualInterruptTable::new(),
        CpuConfig::default(),
    )
}

pub fn build(
    program: &[Instruction],
    privileged: bool,
    ports: PortBus,
    vints: VirtualInterruptTable,
    config: CpuConfig,
) -> CPUCore {
    let words: Vec<u32> = program.iter().map(Instruction::encode).collect();
    build_words(&words, privileged, ports, vints, config)
}

pub fn build_words(
    words: &[u32],
    privileged: bool,
    ports: PortBus,
    vints: VirtualInterruptTable,
    config: CpuConfig,
) -> CPUCore {
    let memory = Arc::new(MemoryController::new(4 * SEGMENT_SIZE).unwrap());
    memory.boot().unwrap();
    let image = ProgramImage::new()
        .with_text(0, words)
        .with_bss(u32::from(DATA), 0x100)
        .with_stack(256);
    let program = memory.load_program(&image, "main").unwrap();

    let mut core = CPUCore::new(0, memory, Arc::new(ports), Arc::new(vints), &config);
    core.boot(BootState::from(&program).privileged(privileged));
    core
}

// === Assembly shorthands ===

pub fn imm(value: i32) -> Operand {
    Operand::Imm(value)
}

pub fn r(index: u8) -> Operand {
    Operand::Reg(index)
}

pub fn li(reg: u8, value: i32) -> Instruction {
    Instruction::Li(RegImm { reg, operand: imm(value) })
}

pub fn ri(make: fn(RegImm) -> Instruction, reg: u8, operand: Operand) -> Instruction {
    make(RegImm { reg, operand })
}

pub fn reg(make: fn(Reg) -> Instruction, reg: u8) -> Instruction {
    make(Reg { reg })
}

pub fn rr(make: fn(RegReg) -> Instruction, reg1: u8, reg2: u8) -> Instruction {
    make(RegReg { reg1, reg2 })
}

pub fn mem(make: fn(RegAddr) -> Instruction, reg: u8, base: u8, offset: i16) -> Instruction {
    make(RegAddr { reg, base, offset })
}

pub fn hlt(operand: Operand) -> Instruction {
    Instruction::Hlt(Imm { operand })
}

pub fn push(operand: Operand) -> Instruction {
    Instruction::Push(Imm { operand })
}

pub fn int(index: i32) -> Instruction {
    Instruction::Int(Imm { operand: imm(index) })
}

/// Relative jump, offset counted from the next instruction
pub fn j(offset: i32) -> Instruction {
    Instruction::J(Imm { operand: imm(offset) })
}

pub fn call(offset: i32) -> Instruction {
    Instruction::Call(Imm { operand: imm(offset) })
}

pub fn branch(condition: Condition, offset: i32) -> Instruction {
    Instruction::Branch(condition, Imm { operand: imm(offset) })
}

/// Run to completion and return the exit code
pub fn run_to_halt(core: &mut CPUCore) -> i32 {
    let _ = core.run(Some(10_000));
    assert_eq!(core.status(), CoreStatus::Halted, "core did not halt");
    core.exit_code()
}
