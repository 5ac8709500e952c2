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

/// Emulator error types
use thiserror::Error;

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Main error type for the emulator
///
/// Memory and ISA faults (`AccessViolation`, `MisalignedAccess`,
/// `ArithmeticFault`, `InvalidOpcode`, `CpuException`) are fatal to the core
/// that raised them. The remaining variants are reported to whoever asked for
/// the resource or parsed the input.
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Resource exhausted: no free {0}")]
    ResourceExhausted(&'static str),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource conflict: {0}")]
    ResourceConflict(String),

    #[error("Access violation: {0}")]
    AccessViolation(String),

    #[error("Unaligned memory access: {size}-byte access at 0x{address:06X}")]
    MisalignedAccess { address: u32, size: u8 },

    #[error("Arithmetic fault: {0}")]
    ArithmeticFault(&'static str),

    #[error("Invalid opcode {opcode} in instruction 0x{instruction:08X}")]
    InvalidOpcode { opcode: u8, instruction: u32 },

    #[error("CPU exception: {0}")]
    CpuException(String),

    #[error("Malformed program image: {0}")]
    MalformedImage(String),

    #[error("Malformed state: {0}")]
    MalformedState(String),

    #[error("Storage access error: {0}")]
    StorageAccess(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
