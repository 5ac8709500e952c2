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

//! Interrupt entry and exit
//!
//! Entering an interrupt (hardware IRQ, or `INT` without a virtual handler):
//!
//! 1. read the vector from the IRQ or INT table
//! 2. allocate a fresh read+write page in the vector's data segment
//! 3. switch `DS` to that segment and `SP` to the top of the page
//! 4. push the old `DS`, old `SP`, `CS`, `FLAGS`, then R0..R31
//! 5. create a call frame (push `IP`, `FP`; `FP = SP`)
//! 6. jump to the vector's `CS:IP` in privileged mode with hardware
//!    interrupts disabled
//!
//! `RETINT` undoes the sequence and frees the page, discarding any cached
//! words of it without write-back.

use super::{CPUCore, CoreStatus, Flags, FrameKind};
use crate::core::error::{EmulatorError, Result};
use crate::core::interrupt::VectorTable;
use crate::core::memory::{page_index, segment_address, PageFlags, PAGE_SHIFT, PAGE_SIZE};

impl CPUCore {
    /// Queue a hardware IRQ
    ///
    /// The IRQ is serviced before the next instruction once hardware
    /// interrupts are enabled. An idle core wakes up to service it.
    pub fn deliver_irq(&mut self, index: u8) {
        log::debug!("Core {} received IRQ {}", self.id, index);
        self.pending_irqs.push_back(index);
    }

    /// Number of queued IRQs
    pub fn pending_irq_count(&self) -> usize {
        self.pending_irqs.len()
    }

    pub(super) fn can_service_irq(&self) -> bool {
        self.regs.flags.contains(Flags::HWINT) && !self.pending_irqs.is_empty()
    }

    pub(super) fn service_pending_irq(&mut self) -> Result<()> {
        if !self.can_service_irq() {
            return Ok(());
        }
        match self.pending_irqs.pop_front() {
            Some(index) => self.enter_interrupt(VectorTable::Irq, index),
            None => Ok(()),
        }
    }

    /// Enter hardware interrupt `index` immediately
    ///
    /// Faults halt the core, as in `step`.
    pub fn irq(&mut self, index: u8) -> Result<()> {
        if self.status != CoreStatus::Running {
            return Err(EmulatorError::CpuException(format!(
                "core {} cannot take IRQ {} while {:?}",
                self.id, index, self.status
            )));
        }
        let result = self.enter_interrupt(VectorTable::Irq, index);
        if let Err(e) = &result {
            self.die(e);
        }
        result
    }

    /// `INT`: run the virtual handler if one is registered, otherwise trap
    /// through the software table
    pub(super) fn software_interrupt(&mut self, index: u8) -> Result<()> {
        match self.vints.get(index) {
            Some(handler) => {
                log::trace!("Core {} virtual interrupt {} ({})", self.id, index, handler.name());
                handler.run(self)
            }
            None => self.enter_interrupt(VectorTable::Int, index),
        }
    }

    pub(super) fn enter_interrupt(&mut self, table: VectorTable, index: u8) -> Result<()> {
        let vector = self.memory.load_interrupt_vector(table, index)?;

        let page = self.memory.alloc_page(Some(vector.ds))?;
        let page_base = page << PAGE_SHIFT;
        self.memory.update_area_flags(
            page_base,
            PAGE_SIZE as u32,
            PageFlags::READ | PageFlags::WRITE,
            true,
        )?;

        let old_ds = self.regs.ds;
        let old_sp = self.regs.sp;
        let old_flags = self.regs.flags;

        self.regs.ds = vector.ds;
        // The top of the segment's last page wraps to offset 0
        self.regs.sp = (page_base + PAGE_SIZE as u32 - segment_address(vector.ds, 0)) as u16;

        self.push(u16::from(old_ds))?;
        self.push(old_sp)?;
        self.push(u16::from(self.regs.cs))?;
        self.push(old_flags.bits())?;
        for index in 0..32 {
            self.push(self.regs.gpr(index))?;
        }
        self.create_frame(FrameKind::Interrupt, vector.cs)?;

        self.regs.cs = vector.cs;
        self.regs.ip = vector.ip;
        self.regs.flags.insert(Flags::PRIVILEGED);
        self.regs.flags.remove(Flags::HWINT);
        self.set_idle(false);

        log::debug!(
            "Core {} entered {:?} {} -> {} (stack page {})",
            self.id,
            table,
            index,
            vector,
            page
        );
        Ok(())
    }

    /// `RETINT`
    pub(super) fn exit_interrupt(&mut self) -> Result<()> {
        self.destroy_frame(FrameKind::Interrupt)?;
        let page = page_index(self.data_address(self.regs.sp));

        for index in (0..32).rev() {
            let value = self.pop()?;
            self.regs.set_gpr(index, value);
        }
        let flags = self.pop()?;
        let cs = self.pop()?;
        let sp = self.pop()?;
        let ds = self.pop()?;

        self.regs.flags = Flags::from_bits_truncate(flags);
        self.regs.cs = cs as u8;
        self.regs.sp = sp;
        self.regs.ds = ds as u8;

        self.dcache.remove_page_references(page, false)?;
        self.memory.free_page(page)?;

        log::debug!(
            "Core {} returned from interrupt to {:02X}:{:04X}",
            self.id,
            self.regs.cs,
            self.regs.ip
        );
        Ok(())
    }
}
