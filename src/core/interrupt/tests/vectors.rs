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
use crate::core::memory::MemoryController;

#[test]
fn test_vector_raw_round_trip() {
    let vector = InterruptVector::new(0x12, 0x34, 0xBEEF);
    assert_eq!(vector.to_raw(), 0xBEEF_3412);
    assert_eq!(InterruptVector::from_raw(vector.to_raw()), vector);
}

#[test]
fn test_table_addresses_do_not_overlap() {
    let irq_end = VectorTable::Irq.address() + (VECTOR_COUNT * VECTOR_SIZE) as u32;
    assert!(irq_end <= VectorTable::Int.address());
}

#[test]
fn test_vectors_are_stored_per_table() {
    let memory = MemoryController::new(0x20000).unwrap();
    memory.boot().unwrap();

    let timer = InterruptVector::new(1, 2, 0x0100);
    let blockio = InterruptVector::new(3, 4, 0x0200);
    memory
        .save_interrupt_vector(VectorTable::Irq, irqs::TIMER, timer)
        .unwrap();
    memory
        .save_interrupt_vector(VectorTable::Int, irqs::TIMER, blockio)
        .unwrap();

    assert_eq!(
        memory
            .load_interrupt_vector(VectorTable::Irq, irqs::TIMER)
            .unwrap(),
        timer
    );
    assert_eq!(
        memory
            .load_interrupt_vector(VectorTable::Int, irqs::TIMER)
            .unwrap(),
        blockio
    );
}

#[test]
fn test_vector_record_layout_in_memory() {
    let memory = MemoryController::new(0x20000).unwrap();
    memory.boot().unwrap();

    memory
        .save_interrupt_vector(VectorTable::Int, 5, InterruptVector::new(0xAA, 0xBB, 0x1234))
        .unwrap();

    let base = INT_TABLE_ADDRESS + 5 * VECTOR_SIZE as u32;
    assert_eq!(memory.read_u8(base, true).unwrap(), 0xAA);
    assert_eq!(memory.read_u8(base + 1, true).unwrap(), 0xBB);
    assert_eq!(memory.read_u16(base + 2, true).unwrap(), 0x1234);
}

#[test]
fn test_vector_index_out_of_range() {
    let memory = MemoryController::new(0x20000).unwrap();
    memory.boot().unwrap();
    assert!(memory
        .load_interrupt_vector(VectorTable::Irq, VECTOR_COUNT as u8)
        .is_err());
}

#[test]
fn test_vector_tables_are_privileged() {
    let memory = MemoryController::new(0x20000).unwrap();
    memory.boot().unwrap();
    assert!(memory.read_u32(IRQ_TABLE_ADDRESS, false).is_err());
}
