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

/// 128KB controller (segments 0 and 1), booted
pub fn booted_memory() -> MemoryController {
    let memory = MemoryController::new(2 * SEGMENT_SIZE).unwrap();
    memory.boot().unwrap();
    memory
}

/// Booted controller plus one allocated segment whose first page is
/// readable and writable. Returns the base address of that segment.
pub fn memory_with_rw_page() -> (MemoryController, u32) {
    let memory = booted_memory();
    let segment = memory.alloc_segment().unwrap();
    let base = segment_address(segment, 0);
    memory
        .update_area_flags(base, PAGE_SIZE as u32, PageFlags::READ | PageFlags::WRITE, true)
        .unwrap();
    (memory, base)
}
