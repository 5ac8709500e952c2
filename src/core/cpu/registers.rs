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

//! Register file
//!
//! | Index | Name    | Notes                          |
//! |-------|---------|--------------------------------|
//! | 0-31  | R0-R31  | General purpose, 16-bit        |
//! | 32    | FP      | Frame pointer                  |
//! | 33    | SP      | Stack pointer                  |
//! | 34    | IP      | Instruction pointer            |
//! | 35    | FLAGS   | See [`Flags`]                  |
//! | 36    | CS      | Code segment (8 bits used)     |
//! | 37    | DS      | Data segment (8 bits used)     |
//! | 38    | CNT     | Instruction counter, low 16 bits |
//!
//! Indices 32 and above are protected: only `MOV`/`SWP` may name them, and
//! only in privileged mode.

use bitflags::bitflags;
use std::fmt;

/// Register indices
pub mod reg {
    pub const FP: u8 = 32;
    pub const SP: u8 = 33;
    pub const IP: u8 = 34;
    pub const FLAGS: u8 = 35;
    pub const CS: u8 = 36;
    pub const DS: u8 = 37;
    pub const CNT: u8 = 38;

    /// Number of general purpose registers
    pub const GPR_COUNT: usize = 32;

    /// Number of addressable registers
    pub const COUNT: u8 = 39;
}

bitflags! {
    /// FLAGS register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u16 {
        /// Privileged mode
        const PRIVILEGED = 0x01;
        /// Hardware interrupts enabled
        const HWINT = 0x02;
        const EQUAL = 0x04;
        const ZERO = 0x08;
        const OVERFLOW = 0x10;
        const SIGN = 0x20;
    }
}

/// Per-core registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    gpr: [u16; reg::GPR_COUNT],
    pub fp: u16,
    pub sp: u16,
    pub ip: u16,
    pub flags: Flags,
    pub cs: u8,
    pub ds: u8,
    /// Free-running instruction counter
    pub cnt: u64,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Power-on register file: everything zero, hardware interrupts enabled
    pub fn new() -> Self {
        Self {
            gpr: [0; reg::GPR_COUNT],
            fp: 0,
            sp: 0,
            ip: 0,
            flags: Flags::HWINT,
            cs: 0,
            ds: 0,
            cnt: 0,
        }
    }

    /// Zero R0-R31 and set FLAGS to its post-reset value
    ///
    /// Segment, stack, frame and instruction pointers are left alone.
    pub fn reset(&mut self) {
        self.gpr = [0; reg::GPR_COUNT];
        self.flags = Flags::HWINT;
    }

    /// Read a general purpose register
    ///
    /// # Panics
    ///
    /// If `index` is 32 or above.
    #[inline(always)]
    pub fn gpr(&self, index: u8) -> u16 {
        self.gpr[index as usize]
    }

    /// Write a general purpose register
    ///
    /// # Panics
    ///
    /// If `index` is 32 or above.
    #[inline(always)]
    pub fn set_gpr(&mut self, index: u8, value: u16) {
        self.gpr[index as usize] = value;
    }

    pub fn gprs(&self) -> &[u16; reg::GPR_COUNT] {
        &self.gpr
    }

    pub fn set_gprs(&mut self, values: [u16; reg::GPR_COUNT]) {
        self.gpr = values;
    }

    /// Read any register by index, `None` if the index names no register
    pub fn get(&self, index: u8) -> Option<u16> {
        Some(match index {
            0..=31 => self.gpr[index as usize],
            reg::FP => self.fp,
            reg::SP => self.sp,
            reg::IP => self.ip,
            reg::FLAGS => self.flags.bits(),
            reg::CS => u16::from(self.cs),
            reg::DS => u16::from(self.ds),
            reg::CNT => self.cnt as u16,
            _ => return None,
        })
    }

    /// Write any register by index, returning `false` if the index names no
    /// register
    ///
    /// Segment registers keep the low 8 bits. Writing CNT replaces its low
    /// 16 bits.
    pub fn set(&mut self, index: u8, value: u16) -> bool {
        match index {
            0..=31 => self.gpr[index as usize] = value,
            reg::FP => self.fp = value,
            reg::SP => self.sp = value,
            reg::IP => self.ip = value,
            reg::FLAGS => self.flags = Flags::from_bits_truncate(value),
            reg::CS => self.cs = value as u8,
            reg::DS => self.ds = value as u8,
            reg::CNT => self.cnt = (self.cnt & !0xFFFF) | u64::from(value),
            _ => return false,
        }
        true
    }

    #[inline(always)]
    pub fn privileged(&self) -> bool {
        self.flags.contains(Flags::PRIVILEGED)
    }

    /// Update ZERO and SIGN from a result
    #[inline(always)]
    pub fn set_zs(&mut self, value: u16) {
        self.flags.set(Flags::ZERO, value == 0);
        self.flags.set(Flags::SIGN, value & 0x8000 != 0);
    }

    /// Name of a register index
    pub fn name(index: u8) -> String {
        match index {
            0..=31 => format!("r{}", index),
            reg::FP => "fp".to_string(),
            reg::SP => "sp".to_string(),
            reg::IP => "ip".to_string(),
            reg::FLAGS => "flags".to_string(),
            reg::CS => "cs".to_string(),
            reg::DS => "ds".to_string(),
            reg::CNT => "cnt".to_string(),
            other => format!("?{}", other),
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |flag: Flags, c: char| if self.contains(flag) { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}{}",
            bit(Flags::PRIVILEGED, 'P'),
            bit(Flags::HWINT, 'H'),
            bit(Flags::EQUAL, 'E'),
            bit(Flags::ZERO, 'Z'),
            bit(Flags::OVERFLOW, 'O'),
            bit(Flags::SIGN, 'S')
        )
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "cs=0x{:02X} ds=0x{:02X} ip=0x{:04X} sp=0x{:04X} fp=0x{:04X} flags={} cnt={}",
            self.cs, self.ds, self.ip, self.sp, self.fp, self.flags, self.cnt
        )?;
        for (row, chunk) in self.gpr.chunks(8).enumerate() {
            for (col, value) in chunk.iter().enumerate() {
                write!(f, "r{:<2}=0x{:04X} ", row * 8 + col, value)?;
            }
            if row < 3 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
