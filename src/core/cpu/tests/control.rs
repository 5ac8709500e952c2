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
use crate::core::cpu::decode::{Condition, Imm, Instruction as I};

/// Whether `condition` is taken after `cmp a, b`
fn taken(a: i32, b: i32, condition: Condition) -> bool {
    let mut core = core_with(
        &[
            li(0, a),
            ri(I::Cmp, 0, imm(b)),
            branch(condition, 4),
            li(2, 1),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    core.registers().gpr(2) == 0
}

#[test]
fn test_branch_conditions() {
    use Condition::*;

    assert!(taken(3, 3, Equal));
    assert!(!taken(3, 4, Equal));
    assert!(taken(3, 4, NotEqual));
    assert!(taken(0, 0, Zero));
    assert!(!taken(3, 3, Zero));
    assert!(taken(3, 3, NotZero));
    assert!(taken(-1, 1, Sign));
    assert!(taken(1, -1, NotSign));

    assert!(taken(5, 2, Greater));
    assert!(!taken(2, 2, Greater));
    assert!(!taken(-5, 2, Greater));
    assert!(taken(2, 2, GreaterEqual));
    assert!(taken(5, 2, GreaterEqual));
    assert!(!taken(1, 2, GreaterEqual));
    assert!(taken(-5, 2, Less));
    assert!(!taken(2, 2, Less));
    assert!(taken(2, 2, LessEqual));
    assert!(!taken(3, 2, LessEqual));
}

#[test]
fn test_jump_register_target() {
    let mut core = core_with(&[li(3, 12), I::J(Imm { operand: r(3) }), li(0, 1), I::Idle], false);
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(0), 0);
    assert_eq!(core.registers().ip, 16);
}

#[test]
fn test_backward_branch_loop() {
    // r0 counts down from 5, r1 counts iterations
    let mut core = core_with(
        &[
            li(0, 5),
            reg(I::Inc, 1),
            reg(I::Dec, 0),
            branch(Condition::NotZero, -12),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(1), 5);
}

fn call_program() -> Vec<I> {
    vec![
        call(8),
        li(0, 7),
        I::Idle,
        // callee
        push(imm(1)),
        reg(I::Pop, 1),
        I::Ret,
    ]
}

#[test]
fn test_call_and_return_restore_stack() {
    let mut core = core_with(&call_program(), false);
    let sp = core.registers().sp;
    let fp = core.registers().fp;

    core.step().unwrap();
    assert_eq!(core.frame_depth(), 1);
    assert_eq!(core.registers().ip, 12);
    assert_eq!(core.registers().sp, sp - 4);
    assert_eq!(core.registers().fp, sp - 4);
    assert_eq!(core.backtrace()[0].ip, 4);
    assert_eq!(core.backtrace()[0].cs, 1);

    core.run(None).unwrap();
    assert_eq!(core.frame_depth(), 0);
    assert_eq!(core.registers().gpr(0), 7);
    assert_eq!(core.registers().gpr(1), 1);
    assert_eq!(core.registers().sp, sp);
    assert_eq!(core.registers().fp, fp);
}

#[test]
fn test_nested_calls() {
    let mut core = core_with(
        &[
            call(4),  // -> 8
            I::Idle,
            call(4), // -> 16
            I::Ret,
            reg(I::Inc, 0),
            I::Ret,
        ],
        false,
    );
    let sp = core.registers().sp;
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(0), 1);
    assert_eq!(core.registers().ip, 8);
    assert_eq!(core.registers().sp, sp);
}

fn unbalanced_program() -> Vec<I> {
    vec![call(4), I::Idle, push(imm(1)), I::Ret, I::Idle]
}

#[test]
fn test_unbalanced_return_detected() {
    let config = CpuConfig {
        check_frames: true,
        ..CpuConfig::default()
    };
    let mut core = build(
        &unbalanced_program(),
        false,
        PortBus::new(),
        VirtualInterruptTable::new(),
        config,
    );
    let err = core.run(None).unwrap_err();
    assert!(matches!(err, EmulatorError::CpuException(_)));
    assert_eq!(core.status(), CoreStatus::Halted);
    assert_eq!(core.exit_code(), 1);
    assert_eq!(core.frame_depth(), 1);
}

#[test]
fn test_unbalanced_return_unchecked() {
    // Without checking, RET pops whatever is on top of the stack
    let mut core = core_with(&unbalanced_program(), false);
    core.step().unwrap();
    core.step().unwrap();
    core.step().unwrap();
    assert_eq!(core.frame_depth(), 0);
    assert_eq!(core.registers().fp, 1);
}

#[test]
fn test_return_without_frame() {
    let mut core = core_with(&[I::Ret], false);
    assert!(matches!(core.step(), Err(EmulatorError::CpuException(_))));
    assert_eq!(core.exit_code(), 1);
}

#[test]
fn test_push_pop_order() {
    let mut core = core_with(
        &[
            push(imm(1)),
            push(imm(2)),
            reg(I::Pop, 0),
            reg(I::Pop, 1),
            I::Idle,
        ],
        false,
    );
    core.run(None).unwrap();
    assert_eq!(core.registers().gpr(0), 2);
    assert_eq!(core.registers().gpr(1), 1);
}
