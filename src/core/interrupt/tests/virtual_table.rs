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

use super::super::*;
use crate::core::cpu::CPUCore;

struct Nop;

impl VirtualInterrupt for Nop {
    fn run(&self, _core: &mut CPUCore) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "nop"
    }
}

#[test]
fn test_register_and_lookup() {
    let mut table = VirtualInterruptTable::new();
    assert!(table.is_empty());

    table.register(ints::DEBUG, Arc::new(Nop)).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(ints::DEBUG).unwrap().name(), "nop");
    assert!(table.get(ints::BLOCKIO).is_none());
}

#[test]
fn test_duplicate_registration_conflicts() {
    let mut table = VirtualInterruptTable::new();
    table.register(ints::MATH, Arc::new(Nop)).unwrap();
    assert!(matches!(
        table.register(ints::MATH, Arc::new(Nop)),
        Err(EmulatorError::ResourceConflict(_))
    ));
}

#[test]
fn test_index_outside_table() {
    let mut table = VirtualInterruptTable::new();
    assert!(matches!(
        table.register(200, Arc::new(Nop)),
        Err(EmulatorError::ResourceNotFound(_))
    ));
}
