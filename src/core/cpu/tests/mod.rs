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

//! CPU core tests
//!
//! - `basic`: lifecycle, stepping, registers, faults
//! - `decode`: encoding and decoding, disassembly
//! - `caches`: LRU arena, instruction cache, data cache write-back
//! - `arithmetic`: arithmetic, bitwise and compare flags
//! - `control`: branches, calls, frame checking
//! - `data`: loads, stores, register moves, CAS, port I/O
//! - `interrupts`: IRQ and software interrupt entry/exit
//! - `state`: state capture and restore

use super::*;

mod control;
mod data;
mod helpers;
