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

//! Call frames
//!
//! `CALL` and interrupt entry both push `IP` and `FP`, set `FP = SP` and
//! record a frame; `RET` and `RETINT` destroy it. Each frame remembers which
//! of the two opened it, and only the matching return may close it. The
//! frame list mirrors the in-memory stack so faults can print a backtrace.

use super::CPUCore;
use crate::core::error::{EmulatorError, Result};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What opened a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum FrameKind {
    /// `CALL`, closed by `RET`
    Call,
    /// Interrupt entry, closed by `RETINT`
    Interrupt,
}

impl FrameKind {
    fn closer(self) -> &'static str {
        match self {
            FrameKind::Call => "RET",
            FrameKind::Interrupt => "RETINT",
        }
    }
}

/// One active call or interrupt level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct CallFrame {
    /// Call or interrupt
    pub kind: FrameKind,
    /// Code segment of the callee
    pub cs: u8,
    /// Data segment holding the frame
    pub ds: u8,
    /// Frame pointer (SP right after the frame was pushed)
    pub fp: u16,
    /// Return address
    pub ip: u16,
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} fp={:02X}:{:04X} return to ip=0x{:04X} (cs=0x{:02X})",
            self.kind, self.ds, self.fp, self.ip, self.cs
        )
    }
}

impl CPUCore {
    /// Push `IP` and `FP`, point `FP` at them and record the frame
    ///
    /// Call after `CS` has been switched to the callee if the segment
    /// changes; the return address is the current `IP`.
    pub(super) fn create_frame(&mut self, kind: FrameKind, callee_cs: u8) -> Result<()> {
        let return_ip = self.regs.ip;
        self.push(return_ip)?;
        self.push(self.regs.fp)?;
        self.regs.fp = self.regs.sp;
        self.frames.push(CallFrame {
            kind,
            cs: callee_cs,
            ds: self.regs.ds,
            fp: self.regs.fp,
            ip: return_ip,
        });
        Ok(())
    }

    /// Verify and drop the innermost frame, popping `FP` and `IP`
    ///
    /// # Errors
    ///
    /// `CpuException` if there is no frame, if the innermost frame was
    /// opened by the other kind of entry, or if frame checking is on and
    /// `SP` does not equal the frame's `FP`.
    pub(super) fn destroy_frame(&mut self, kind: FrameKind) -> Result<()> {
        let frame = self.frames.pop().ok_or_else(|| {
            EmulatorError::CpuException(format!(
                "{} without an active frame",
                kind.closer()
            ))
        })?;

        if frame.kind != kind {
            self.frames.push(frame);
            return Err(EmulatorError::CpuException(format!(
                "{} inside a {:?} frame, expected {}",
                kind.closer(),
                frame.kind,
                frame.kind.closer()
            )));
        }

        if self.check_frames && self.regs.sp != frame.fp {
            let sp = self.regs.sp;
            self.frames.push(frame);
            return Err(EmulatorError::CpuException(format!(
                "unbalanced stack on return: sp=0x{:04X}, frame fp=0x{:04X}",
                sp, frame.fp
            )));
        }

        self.regs.fp = self.pop()?;
        self.regs.ip = self.pop()?;
        Ok(())
    }

    /// Active frames, innermost first
    pub fn backtrace(&self) -> Vec<CallFrame> {
        self.frames.iter().rev().copied().collect()
    }

    /// Number of active frames
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }
}
