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

//! Emulator core
//!
//! Leaves first: [`memory`] and [`interrupt`] are shared by every [`cpu`]
//! core, and [`system`] assembles them into a running [`Machine`].

pub mod config;
pub mod cpu;
pub mod error;
pub mod interrupt;
pub mod loader;
pub mod memory;
pub mod save_state;
pub mod storage;
pub mod system;

pub use config::MachineConfig;
pub use cpu::CPUCore;
pub use error::{EmulatorError, Result};
pub use loader::ProgramImage;
pub use memory::MemoryController;
pub use save_state::MachineSnapshot;
pub use system::Machine;
