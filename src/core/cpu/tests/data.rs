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

use super::helpers::*;
use super::*;
use crate::core::config::CpuConfig;
use crate::core::cpu::decode::{Instruction as I, RegRegReg};
use crate::core::memory::{segment_address, PortHandler, TtyPort};
use std::sync::atomic::{AtomicU16, Ordering};

const D: i16 = DATA as i16;

fn data_word(core: &CPUCore, offset: u16) -> u16 {
    core.memory()
        .read_u16(segment_address(1, DATA + offset), true)
        .unwrap()
}

fn cas(address: u8, expected: u8, new: u8) -> I {
    I::Cas(RegRegReg {
        reg1: address,
        reg2: expected,
        reg3: new,
    })
}

#[test]
fn test_store_then_load() {
    let mut core = core_with(
        &[
            li(0, 0x1234),
            mem(I::Stw, 0, 2, D + 2),
            mem(I::Lw, 1, 2, D + 2),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(1), 0x1234);

    // Still only in the data cache
    let address = segment_address(1, DATA + 2);
    assert!(core.dcache().is_dirty(address));
    assert_eq!(data_word(&core, 2), 0);

    core.flush_data_cache().unwrap();
    assert_eq!(data_word(&core, 2), 0x1234);
    assert!(!core.dcache().is_dirty(address));
}

#[test]
fn test_halt_writes_back() {
    let mut core = core_with(&[li(0, 77), mem(I::Stw, 0, 2, D), hlt(imm(0))], true);
    run_to_halt(&mut core);
    assert_eq!(data_word(&core, 0), 77);
}

#[test]
fn test_load_updates_flags() {
    let mut core = core_with(
        &[
            li(0, -2),
            mem(I::Stw, 0, 2, D),
            mem(I::Lw, 1, 2, D),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert!(core.registers().flags.contains(Flags::SIGN));
    assert!(!core.registers().flags.contains(Flags::ZERO));
}

#[test]
fn test_byte_store_sees_cached_word() {
    let mut core = core_with(
        &[
            li(0, 0x1234),
            mem(I::Stw, 0, 2, D),
            li(1, 0xAB),
            mem(I::Stb, 1, 2, D),
            mem(I::Lw, 3, 2, D),
            mem(I::Lb, 4, 2, D + 1),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(3), 0x12AB);
    assert_eq!(core.registers().gpr(4), 0x12);
}

#[test]
fn test_store_to_text_faults() {
    let mut core = core_with(&[li(0, 1), mem(I::Stw, 0, 2, 0)], false);
    core.step().unwrap();
    assert!(matches!(core.step(), Err(EmulatorError::AccessViolation(_))));
    assert_eq!(core.exit_code(), 1);
}

#[test]
fn test_misaligned_word_load() {
    let mut core = core_with(&[mem(I::Lw, 0, 2, D + 1)], false);
    assert!(matches!(
        core.step(),
        Err(EmulatorError::MisalignedAccess { size: 2, .. })
    ));
}

#[test]
fn test_negative_offset() {
    let mut core = core_with(
        &[
            li(5, i32::from(DATA) + 8),
            li(0, 3),
            mem(I::Stw, 0, 5, -8),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    core.flush_data_cache().unwrap();
    assert_eq!(data_word(&core, 0), 3);
}

#[test]
fn test_li_from_register() {
    let mut core = core_with(&[li(1, 42), ri(I::Li, 0, r(1)), I::Idle], false);
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(0), 42);
}

#[test]
fn test_mov_and_swp() {
    let mut core = core_with(
        &[
            li(0, 1),
            li(1, 2),
            rr(I::Swp, 0, 1),
            rr(I::Mov, 2, 0),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    let regs = core.registers();
    assert_eq!((regs.gpr(0), regs.gpr(1), regs.gpr(2)), (2, 1, 2));
}

#[test]
fn test_mov_special_register_requires_privilege() {
    let mut core = core_with(&[rr(I::Mov, 0, reg::SP)], false);
    assert!(matches!(core.step(), Err(EmulatorError::AccessViolation(_))));

    let mut core = core_with(&[rr(I::Mov, 0, reg::SP), rr(I::Mov, reg::DS, 0)], true);
    let sp = core.registers().sp;
    core.step().unwrap();
    assert_eq!(core.registers().gpr(0), sp);
}

#[test]
fn test_mov_unknown_register() {
    let mut core = core_with(&[rr(I::Mov, 0, 50)], true);
    assert!(matches!(core.step(), Err(EmulatorError::CpuException(_))));
}

#[test]
fn test_cas_swaps_and_reports() {
    let mut core = core_with(
        &[
            li(0, i32::from(DATA)),
            li(1, 0),
            li(2, 9),
            cas(0, 1, 2),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert!(core.registers().flags.contains(Flags::EQUAL));
    // No flush needed
    assert_eq!(data_word(&core, 0), 9);
}

#[test]
fn test_cas_mismatch_loads_observed() {
    let mut core = core_with(
        &[
            li(3, 6),
            mem(I::Stw, 3, 4, D),
            li(0, i32::from(DATA)),
            li(1, 5),
            li(2, 9),
            cas(0, 1, 2),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert!(!core.registers().flags.contains(Flags::EQUAL));
    assert_eq!(core.registers().gpr(1), 6);
    assert_eq!(data_word(&core, 0), 6);
}

struct Latch {
    value: AtomicU16,
    protected: bool,
}

impl Latch {
    fn new(protected: bool) -> Arc<Self> {
        Arc::new(Self {
            value: AtomicU16::new(0),
            protected,
        })
    }
}

impl PortHandler for Latch {
    fn read_u8(&self, _port: u16) -> crate::core::error::Result<u8> {
        Ok(self.value.load(Ordering::Relaxed) as u8)
    }

    fn write_u8(&self, _port: u16, value: u8) -> crate::core::error::Result<()> {
        self.value.store(u16::from(value), Ordering::Relaxed);
        Ok(())
    }

    fn read_u16(&self, _port: u16) -> crate::core::error::Result<u16> {
        Ok(self.value.load(Ordering::Relaxed))
    }

    fn write_u16(&self, _port: u16, value: u16) -> crate::core::error::Result<()> {
        self.value.store(value, Ordering::Relaxed);
        Ok(())
    }

    fn is_protected(&self) -> bool {
        self.protected
    }
}

fn ports_core(program: &[I], privileged: bool) -> (CPUCore, Arc<Latch>, Arc<Latch>) {
    let open = Latch::new(false);
    let guarded = Latch::new(true);
    let ports = PortBus::new();
    ports.register(0x10, open.clone()).unwrap();
    ports.register(0x20, guarded.clone()).unwrap();
    let core = build(
        program,
        privileged,
        ports,
        VirtualInterruptTable::new(),
        CpuConfig::default(),
    );
    (core, open, guarded)
}

#[test]
fn test_port_io() {
    let (mut core, open, _) = ports_core(
        &[
            li(0, 0xBEEF),
            ri(I::Out, 0, imm(0x10)),
            ri(I::In, 1, imm(0x10)),
            ri(I::Inb, 2, imm(0x10)),
            li(3, 0x1FF),
            ri(I::Outb, 3, imm(0x10)),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(1), 0xBEEF);
    assert_eq!(core.registers().gpr(2), 0xEF);
    assert_eq!(open.value.load(Ordering::Relaxed), 0xFF);
}

#[test]
fn test_protected_port() {
    let (mut core, _, guarded) = ports_core(&[li(0, 1), ri(I::Out, 0, imm(0x20))], false);
    core.step().unwrap();
    assert!(matches!(core.step(), Err(EmulatorError::AccessViolation(_))));
    assert_eq!(guarded.value.load(Ordering::Relaxed), 0);

    let (mut core, _, guarded) = ports_core(&[li(0, 1), ri(I::Out, 0, imm(0x20))], true);
    core.run(Some(2)).unwrap();
    assert_eq!(guarded.value.load(Ordering::Relaxed), 1);
}

#[test]
fn test_unknown_port() {
    let (mut core, _, _) = ports_core(&[ri(I::Inb, 0, imm(0x30))], true);
    assert!(matches!(core.step(), Err(EmulatorError::ResourceNotFound(_))));
}

#[test]
fn test_tty_port_output() {
    let tty = Arc::new(TtyPort::new(Vec::new()));
    let ports = PortBus::new();
    ports.register(1, tty.clone()).unwrap();
    let mut core = build(
        &[
            li(0, i32::from(b'h')),
            ri(I::Outb, 0, imm(1)),
            li(0, i32::from(b'i')),
            ri(I::Outb, 0, imm(1)),
            hlt(imm(0)),
        ],
        true,
        ports,
        VirtualInterruptTable::new(),
        CpuConfig::default(),
    );
    run_to_halt(&mut core);
    drop(core);

    let tty = Arc::try_unwrap(tty).ok().unwrap();
    assert_eq!(tty.into_inner(), b"hi");
}
