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

use super::*;
use crate::core::config::StorageConfig;
use crate::core::cpu::decode::{Condition, Imm, Instruction as I, Operand, RegAddr, RegImm, RegRegReg};
use crate::core::interrupt::{InterruptVector, VectorTable, VirtualInterrupt};
use crate::core::memory::segment_address;
use std::io::Write;
use tempfile::NamedTempFile;

const DATA: i16 = 0x1000;

fn li(reg: u8, value: i32) -> I {
    I::Li(RegImm { reg, operand: Operand::Imm(value) })
}

fn hlt(operand: Operand) -> I {
    I::Hlt(Imm { operand })
}

fn bne(offset: i32) -> I {
    I::Branch(Condition::NotEqual, Imm { operand: Operand::Imm(offset) })
}

fn image(main: &[I], secondary: Option<&[I]>) -> ProgramImage {
    let mut words: Vec<u32> = main.iter().map(I::encode).collect();
    let mut image = ProgramImage::new();
    if let Some(secondary) = secondary {
        let entry = (words.len() * 4) as u16;
        words.extend(secondary.iter().map(I::encode));
        image = image.with_symbol(SECONDARY_ENTRY, entry, 0, 0);
    }
    image
        .with_text(0, &words)
        .with_bss(DATA as u32, 0x100)
        .with_stack(256)
}

fn config(cores: usize) -> MachineConfig {
    let mut config = MachineConfig::default();
    config.cpu.cores = cores;
    config
}

fn machine(cores: usize, main: &[I], secondary: Option<&[I]>) -> Machine {
    Machine::new(&config(cores), &image(main, secondary)).unwrap()
}

#[test]
fn test_exit_code_from_hlt() {
    let mut machine = machine(1, &[hlt(Operand::Imm(7))], None);
    assert_eq!(machine.run().unwrap(), 7);
    assert_eq!(machine.exit_code(), 7);
    assert_eq!(machine.core(0).unwrap().status(), CoreStatus::Halted);
}

#[test]
fn test_fault_exit_code() {
    let program = [
        li(1, 5),
        I::Div(RegImm { reg: 1, operand: Operand::Imm(0) }),
        hlt(Operand::Imm(0)),
    ];
    let mut machine = machine(1, &program, None);
    assert_eq!(machine.run().unwrap(), 1);
}

#[test]
fn test_core_zero_boots_privileged_at_entry() {
    let machine = machine(1, &[hlt(Operand::Imm(0))], None);
    let core = machine.core(0).unwrap();
    assert_eq!(core.status(), CoreStatus::Running);
    assert!(core.registers().privileged());
    assert_eq!(core.registers().ip, 0);
    assert_eq!(core.registers().gpr(0), 0);
}

#[test]
fn test_secondary_cores_stay_in_reset_without_entry() {
    let mut machine = machine(3, &[hlt(Operand::Imm(4))], None);
    assert_eq!(machine.core(1).unwrap().status(), CoreStatus::Reset);
    assert_eq!(machine.run().unwrap(), 4);
    assert_eq!(machine.core(2).unwrap().status(), CoreStatus::Reset);
}

#[test]
fn test_secondary_cores_boot_on_own_stacks() {
    let machine = machine(3, &[hlt(Operand::Imm(0))], Some(&[I::Idle]));
    let main = machine.core(0).unwrap().registers().clone();

    let mut stacks = vec![main.sp];
    for id in 1..3 {
        let core = machine.core(id).unwrap();
        let regs = core.registers();
        assert_eq!(core.status(), CoreStatus::Running);
        assert_eq!(regs.ip, 4);
        assert_eq!(regs.cs, main.cs);
        assert_eq!(regs.gpr(0), id as u16);
        assert_eq!(regs.sp % 256, 0);
        assert!(!stacks.contains(&regs.sp));
        stacks.push(regs.sp);
    }
}

#[test]
fn test_cores_coordinate_through_cas() {
    let main = [
        li(1, i32::from(DATA)),
        li(2, 1),
        li(3, 1),
        I::Cas(RegRegReg { reg1: 1, reg2: 2, reg3: 3 }),
        bne(-16),
        hlt(Operand::Imm(9)),
    ];
    let secondary = [
        li(1, i32::from(DATA)),
        li(2, 0),
        li(3, 1),
        I::Cas(RegRegReg { reg1: 1, reg2: 2, reg3: 3 }),
        hlt(Operand::Imm(3)),
    ];
    let mut machine = machine(2, &main, Some(&secondary));
    machine.set_step_limit(Some(1_000_000));

    assert_eq!(machine.run().unwrap(), 9);
    assert_eq!(machine.core(1).unwrap().status(), CoreStatus::Halted);
    let cs = machine.core(0).unwrap().registers().cs;
    let flag = machine
        .memory()
        .read_u16(segment_address(cs, DATA as u16), true)
        .unwrap();
    assert_eq!(flag, 1);
}

#[test]
fn test_irq_round_robin_before_start() {
    let mut machine = machine(2, &[hlt(Operand::Imm(0))], Some(&[I::Idle]));
    machine.irq(5).unwrap();
    machine.irq(6).unwrap();
    machine.irq(7).unwrap();
    assert_eq!(machine.core(0).unwrap().pending_irq_count(), 2);
    assert_eq!(machine.core(1).unwrap().pending_irq_count(), 1);
}

#[test]
fn test_irq_prefers_idle_core() {
    let mut machine = machine(2, &[hlt(Operand::Imm(0))], Some(&[I::Idle]));
    let core = machine.core_mut(1).unwrap();
    core.step().unwrap();
    assert!(core.is_idle());

    machine.irq(4).unwrap();
    machine.irq(4).unwrap();
    assert_eq!(machine.core(0).unwrap().pending_irq_count(), 0);
    assert_eq!(machine.core(1).unwrap().pending_irq_count(), 2);
}

#[test]
fn test_irq_validation() {
    let mut machine = machine(1, &[hlt(Operand::Imm(0))], None);
    assert!(matches!(machine.irq(64), Err(EmulatorError::CpuException(_))));

    machine.core_mut(0).unwrap().halt().unwrap();
    assert!(matches!(machine.irq(1), Err(EmulatorError::ResourceNotFound(_))));
}

#[test]
fn test_irq_round_trip_on_running_machine() {
    let program = [
        // wait for the handler's flag
        I::Lw(RegAddr { reg: 5, base: 0, offset: DATA }),
        I::Cmp(RegImm { reg: 5, operand: Operand::Imm(42) }),
        bne(-12),
        hlt(Operand::Reg(5)),
        // handler
        li(2, 42),
        I::Stw(RegAddr { reg: 2, base: 0, offset: DATA }),
        I::Retint,
    ];
    let mut machine = machine(1, &program, None);
    machine.set_step_limit(Some(1_000_000));
    let cs = machine.core(0).unwrap().registers().cs;
    machine
        .memory()
        .save_interrupt_vector(VectorTable::Irq, 3, InterruptVector::new(cs, cs, 16))
        .unwrap();

    machine.start().unwrap();
    machine.irq(3).unwrap();
    assert_eq!(machine.wait().unwrap(), 42);
}

#[test]
fn test_broadcasts_on_running_machine() {
    let spin = |offset| I::J(Imm { operand: Operand::Imm(offset) });
    let mut machine = machine(2, &[spin(-4)], Some(&[I::Nop, spin(-8)]));
    machine.start().unwrap();
    assert!(machine.is_running());
    assert!(machine.core(0).is_none());

    machine.suspend_all();
    machine.wake_up_all();
    machine.halt_all();
    assert_eq!(machine.wait().unwrap(), 0);
    assert!(!machine.is_running());
    for id in 0..2 {
        assert_eq!(machine.core(id).unwrap().status(), CoreStatus::Halted);
    }

    // Halting again is harmless
    machine.halt_all();
    assert_eq!(machine.wait().unwrap(), 0);
}

#[test]
fn test_suspend_before_start() {
    let mut machine = machine(1, &[hlt(Operand::Imm(0))], None);
    machine.suspend_all();
    assert_eq!(machine.core(0).unwrap().status(), CoreStatus::Suspended);
    machine.wake_up_all();
    assert_eq!(machine.core(0).unwrap().status(), CoreStatus::Running);
}

#[test]
fn test_step_limit_halts_cores() {
    let mut machine = machine(1, &[I::J(Imm { operand: Operand::Imm(-4) })], None);
    machine.set_step_limit(Some(100));
    assert_eq!(machine.run().unwrap(), 0);
    assert_eq!(machine.core(0).unwrap().registers().cnt, 100);
}

#[test]
fn test_start_twice_is_rejected() {
    let mut machine = machine(1, &[I::J(Imm { operand: Operand::Imm(-4) })], None);
    machine.start().unwrap();
    assert!(matches!(machine.start(), Err(EmulatorError::CpuException(_))));
    machine.halt_all();
    machine.wait().unwrap();
}

#[test]
fn test_snapshot_and_restore() {
    let program = [
        li(1, 3),
        I::Add(RegImm { reg: 1, operand: Operand::Imm(4) }),
        hlt(Operand::Reg(1)),
    ];
    let mut machine = machine(1, &program, None);
    machine.set_name("add.img");
    let initial = machine.snapshot().unwrap();
    assert_eq!(initial.metadata.image, "add.img");

    assert_eq!(machine.run().unwrap(), 7);
    let finished = machine.snapshot().unwrap();
    assert_eq!(finished.cores[0].status, CoreStatus::Halted);
    assert_eq!(finished.metadata.instructions, 3);

    machine.restore(&initial).unwrap();
    assert_eq!(machine.core(0).unwrap().status(), CoreStatus::Running);
    assert_eq!(machine.run().unwrap(), 7);
}

#[test]
fn test_snapshot_while_running_is_rejected() {
    let mut machine = machine(1, &[I::J(Imm { operand: Operand::Imm(-4) })], None);
    machine.start().unwrap();
    assert!(matches!(machine.snapshot(), Err(EmulatorError::CpuException(_))));
    machine.halt_all();
    machine.wait().unwrap();
}

#[test]
fn test_restore_rejects_core_count_mismatch() {
    let mut one = machine(1, &[hlt(Operand::Imm(0))], None);
    let mut two = machine(2, &[hlt(Operand::Imm(0))], None);
    let snapshot = one.snapshot().unwrap();
    assert!(matches!(
        two.restore(&snapshot),
        Err(EmulatorError::MalformedState(_))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = Machine::new(&config(0), &image(&[hlt(Operand::Imm(0))], None));
    assert!(matches!(result, Err(EmulatorError::Config(_))));
}

fn disk() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&[0u8; 4096]).unwrap();
    file.flush().unwrap();
    file
}

fn storage_config(file: &NamedTempFile) -> MachineConfig {
    let mut config = config(1);
    config.storage.push(StorageConfig {
        id: 2,
        path: file.path().to_path_buf(),
        block_size: 1024,
    });
    config
}

#[test]
fn test_storage_devices_answer_block_io() {
    let file = disk();
    let program = [
        li(0, 0),
        li(1, 2),
        I::Int(Imm { operand: Operand::Imm(i32::from(ints::BLOCKIO)) }),
        hlt(Operand::Reg(1)),
    ];
    let mut machine = Machine::new(&storage_config(&file), &image(&program, None)).unwrap();
    assert_eq!(machine.storage().len(), 1);
    assert_eq!(machine.run().unwrap(), 4);
}

struct Nothing;

impl VirtualInterrupt for Nothing {
    fn run(&self, _core: &mut CPUCore) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_block_io_slot_conflict() {
    let file = disk();
    let mut vints = VirtualInterruptTable::new();
    vints.register(ints::BLOCKIO, Arc::new(Nothing)).unwrap();
    let result = Machine::with_interrupts(
        &storage_config(&file),
        &image(&[hlt(Operand::Imm(0))], None),
        vints,
    );
    assert!(matches!(result, Err(EmulatorError::ResourceConflict(_))));
}

#[test]
fn test_custom_virtual_interrupt() {
    let mut vints = VirtualInterruptTable::new();
    vints.register(ints::MATH, Arc::new(Nothing)).unwrap();
    let program = [
        li(0, 6),
        I::Int(Imm { operand: Operand::Imm(i32::from(ints::MATH)) }),
        hlt(Operand::Reg(0)),
    ];
    let mut machine = Machine::with_interrupts(&config(1), &image(&program, None), vints).unwrap();
    assert_eq!(machine.run().unwrap(), 6);
    // Handled on the host, so no interrupt frame was entered
    assert_eq!(machine.core(0).unwrap().frame_depth(), 0);
}
