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

//! Custom assertions for machine tests

use corvid::core::cpu::CoreStatus;
use corvid::core::memory::segment_address;
use corvid::core::system::Machine;

/// Assert a parked core's register has the expected value
#[allow(dead_code)]
pub fn assert_core_reg(machine: &Machine, core: usize, reg: u8, expected: u16) {
    let actual = machine
        .core(core)
        .expect("Core is not parked")
        .registers()
        .gpr(reg);
    assert_eq!(
        actual, expected,
        "Core {} R{} mismatch: expected 0x{:04X}, got 0x{:04X}",
        core, reg, expected, actual
    );
}

/// Assert a parked core is in the expected state
#[allow(dead_code)]
pub fn assert_core_status(machine: &Machine, core: usize, expected: CoreStatus) {
    let actual = machine.core(core).expect("Core is not parked").status();
    assert_eq!(
        actual, expected,
        "Core {} status mismatch: expected {:?}, got {:?}",
        core, expected, actual
    );
}

/// Assert the word at `offset` in the program segment
#[allow(dead_code)]
pub fn assert_program_word(machine: &Machine, offset: u16, expected: u16) {
    let cs = machine
        .core(0)
        .expect("Core 0 is not parked")
        .registers()
        .cs;
    let actual = machine
        .memory()
        .read_u16(segment_address(cs, offset), true)
        .expect("Failed to read memory");
    assert_eq!(
        actual, expected,
        "Memory at {:02X}:{:04X} mismatch: expected 0x{:04X}, got 0x{:04X}",
        cs, offset, expected, actual
    );
}
