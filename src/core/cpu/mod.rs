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

//! CPU core
//!
//! Each core owns its register file, call-frame stack and caches, and shares
//! the memory controller, port bus and virtual interrupt table with every
//! other core.
//!
//! # Lifecycle
//!
//! ```text
//! Reset --boot--> Running <--suspend/wake_up--> Suspended
//!                    |                              |
//!                    +------------halt--------------+--> Halted
//! ```
//!
//! `idle` is orthogonal to the state above: an idle core stays Running but
//! fetches nothing until an IRQ is delivered.
//!
//! # Faults
//!
//! Any error raised while executing an instruction or entering an interrupt
//! is fatal to the core: the fault is logged with a register dump and a frame
//! backtrace, the exit code becomes 1 and the core halts. The error is then
//! returned to the caller.
//!
//! # Example
//!
//! ```
//! use corvid::core::config::CpuConfig;
//! use corvid::core::cpu::{BootState, CPUCore, CoreStatus};
//! use corvid::core::cpu::decode::{Imm, Instruction, Operand, RegImm};
//! use corvid::core::interrupt::VirtualInterruptTable;
//! use corvid::core::loader::ProgramImage;
//! use corvid::core::memory::{MemoryController, PortBus};
//! use std::sync::Arc;
//!
//! let program = [
//!     Instruction::Li(RegImm { reg: 0, operand: Operand::Imm(5) }),
//!     Instruction::Hlt(Imm { operand: Operand::Reg(0) }),
//! ];
//! let words: Vec<u32> = program.iter().map(Instruction::encode).collect();
//!
//! let memory = Arc::new(MemoryController::new(0x20000).unwrap());
//! memory.boot().unwrap();
//! let loaded = memory
//!     .load_program(&ProgramImage::new().with_text(0, &words).with_stack(256), "main")
//!     .unwrap();
//!
//! let mut core = CPUCore::new(
//!     0,
//!     memory,
//!     Arc::new(PortBus::new()),
//!     Arc::new(VirtualInterruptTable::new()),
//!     &CpuConfig::default(),
//! );
//! core.boot(BootState::from(&loaded).privileged(true));
//! core.run(None).unwrap();
//!
//! assert_eq!(core.status(), CoreStatus::Halted);
//! assert_eq!(core.exit_code(), 5);
//! ```

pub mod dcache;
pub mod decode;
mod disassembler;
mod frames;
pub mod icache;
mod instructions;
mod interrupts;
pub mod lru;
mod registers;
#[cfg(test)]
mod tests;

pub use dcache::DataCache;
pub use decode::{Instruction, Opcode};
pub use disassembler::Disassembler;
pub use frames::{CallFrame, FrameKind};
pub use icache::InstructionCache;
pub use registers::{reg, Flags, Registers};

use crate::core::config::CpuConfig;
use crate::core::error::{EmulatorError, Result};
use crate::core::interrupt::VirtualInterruptTable;
use crate::core::memory::{page_index, segment_address, LoadedProgram, MemoryController, PortBus};
use crate::core::save_state::{self, CoreState, CORE_STATE_MAGIC, STATE_VERSION};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Core lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum CoreStatus {
    /// Created, not yet booted
    Reset,
    Running,
    Suspended,
    /// Terminal
    Halted,
}

/// Flags a core publishes for the machine to read without locking the core
#[derive(Debug, Default)]
pub struct CoreSignals {
    alive: AtomicBool,
    idle: AtomicBool,
}

impl CoreSignals {
    /// Booted and not yet halted
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Waiting for an IRQ
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Release);
    }
}

/// Initial register values for `boot`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootState {
    pub cs: u8,
    pub ds: u8,
    pub ip: u16,
    pub sp: u16,
    pub fp: u16,
    /// Start in privileged mode
    pub privileged: bool,
}

impl BootState {
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }
}

impl From<&LoadedProgram> for BootState {
    fn from(program: &LoadedProgram) -> Self {
        Self {
            cs: program.cs,
            ds: program.ds,
            ip: program.ip,
            sp: program.sp,
            fp: program.sp,
            privileged: false,
        }
    }
}

/// One emulated CPU core
pub struct CPUCore {
    id: u32,
    regs: Registers,
    status: CoreStatus,
    idle: bool,
    exit_code: i32,

    /// Active call frames, outermost first
    frames: Vec<CallFrame>,
    check_frames: bool,

    /// IRQs waiting for hardware interrupts to be enabled
    pending_irqs: VecDeque<u8>,

    /// Instruction being executed, for fault reports
    current: Option<Instruction>,

    icache: InstructionCache,
    dcache: DataCache,

    memory: Arc<MemoryController>,
    ports: Arc<PortBus>,
    vints: Arc<VirtualInterruptTable>,
    signals: Arc<CoreSignals>,
}

impl CPUCore {
    /// Create a core in the Reset state
    pub fn new(
        id: u32,
        memory: Arc<MemoryController>,
        ports: Arc<PortBus>,
        vints: Arc<VirtualInterruptTable>,
        config: &CpuConfig,
    ) -> Self {
        Self {
            id,
            regs: Registers::new(),
            status: CoreStatus::Reset,
            idle: false,
            exit_code: 0,
            frames: Vec::new(),
            check_frames: config.check_frames,
            pending_irqs: VecDeque::new(),
            current: None,
            icache: InstructionCache::new(Arc::clone(&memory), config.icache_size),
            dcache: DataCache::new(Arc::clone(&memory), config.dcache_size),
            memory,
            ports,
            vints,
            signals: Arc::new(CoreSignals::default()),
        }
    }

    // === Lifecycle ===

    /// Load initial registers and start running
    pub fn boot(&mut self, state: BootState) {
        self.regs.cs = state.cs;
        self.regs.ds = state.ds;
        self.regs.ip = state.ip;
        self.regs.sp = state.sp;
        self.regs.fp = state.fp;
        self.regs
            .flags
            .set(Flags::PRIVILEGED, state.privileged);
        self.status = CoreStatus::Running;
        self.set_idle(false);
        self.signals.set_alive(true);
        log::info!(
            "Core {} booted at {:02X}:{:04X} (sp=0x{:04X}, {})",
            self.id,
            state.cs,
            state.ip,
            state.sp,
            if state.privileged { "privileged" } else { "user" }
        );
    }

    /// Execute one instruction
    ///
    /// A pending IRQ is serviced first when hardware interrupts are enabled.
    /// An idle core does nothing. A suspended core does nothing.
    ///
    /// # Errors
    ///
    /// Any fault halts the core with exit code 1 before being returned.
    /// Stepping a core that was never booted or has halted is a
    /// `CpuException` and changes nothing.
    pub fn step(&mut self) -> Result<()> {
        match self.status {
            CoreStatus::Running => {}
            CoreStatus::Suspended => return Ok(()),
            status => {
                return Err(EmulatorError::CpuException(format!(
                    "core {} is not running ({:?})",
                    self.id, status
                )))
            }
        }

        let result = self.execute_next();
        if let Err(e) = &result {
            self.die(e);
        }
        result
    }

    fn execute_next(&mut self) -> Result<()> {
        self.service_pending_irq()?;
        if self.idle {
            return Ok(());
        }

        let address = segment_address(self.regs.cs, self.regs.ip);
        let instruction = self.icache.fetch(address)?;
        self.current = Some(instruction);
        log::trace!(
            "core {} {:02X}:{:04X}  {}",
            self.id,
            self.regs.cs,
            self.regs.ip,
            instruction
        );

        self.regs.ip = self.regs.ip.wrapping_add(4);
        self.execute(instruction)?;
        self.regs.cnt += 1;
        Ok(())
    }

    /// Step until the core halts, suspends, goes idle with nothing pending,
    /// or `max_steps` steps have been taken
    ///
    /// Returns the number of steps taken. Meant for single-threaded hosts
    /// and tests; the machine drives cores from their own threads instead.
    pub fn run(&mut self, max_steps: Option<u64>) -> Result<u64> {
        let mut steps = 0;
        while self.status == CoreStatus::Running && max_steps.is_none_or(|max| steps < max) {
            if self.is_waiting() {
                break;
            }
            self.step()?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Nothing to do until something external happens: suspended, or idle
    /// with no IRQ it can service
    pub fn is_waiting(&self) -> bool {
        match self.status {
            CoreStatus::Suspended => true,
            CoreStatus::Running => self.idle && !self.can_service_irq(),
            CoreStatus::Reset | CoreStatus::Halted => false,
        }
    }

    /// Pause execution; `step` becomes a no-op
    pub fn suspend(&mut self) {
        if self.status == CoreStatus::Running {
            self.status = CoreStatus::Suspended;
            log::debug!("Core {} suspended", self.id);
        }
    }

    /// Resume after `suspend`
    pub fn wake_up(&mut self) {
        if self.status == CoreStatus::Suspended {
            self.status = CoreStatus::Running;
            log::debug!("Core {} woken up", self.id);
        }
    }

    /// Stop the core for good
    ///
    /// The data cache is written back. Halting twice is harmless.
    pub fn halt(&mut self) -> Result<()> {
        if self.status == CoreStatus::Halted {
            return Ok(());
        }
        self.status = CoreStatus::Halted;
        self.set_idle(false);
        self.signals.set_alive(false);
        log::info!("Core {} halted (exit code {})", self.id, self.exit_code);
        self.dcache.flush()
    }

    /// Zero R0-R31 and restore FLAGS to hardware-interrupts-enabled
    pub fn reset(&mut self) {
        self.regs.reset();
        log::debug!("Core {} reset", self.id);
    }

    fn die(&mut self, error: &EmulatorError) {
        log::error!("Core {} fault: {}", self.id, error);
        for line in self.fault_report().lines() {
            log::error!("  {}", line);
        }
        self.exit_code = 1;
        if let Err(e) = self.halt() {
            log::warn!("Core {}: data cache write-back failed while halting: {}", self.id, e);
        }
    }

    /// Register dump, current instruction and frame backtrace
    pub fn fault_report(&self) -> String {
        let mut report = format!("{}\n", self.regs);
        match self.current {
            Some(instruction) => report.push_str(&format!("instruction: {}\n", instruction)),
            None => report.push_str("instruction: <none>\n"),
        }
        report.push_str("backtrace:");
        if self.frames.is_empty() {
            report.push_str(" <empty>");
        }
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            report.push_str(&format!("\n  #{} {}", depth, frame));
        }
        report
    }

    /// Log the register file
    pub fn dump_registers(&self) {
        log::info!("Core {} registers:", self.id);
        for line in self.regs.to_string().lines() {
            log::info!("  {}", line);
        }
    }

    fn set_idle(&mut self, idle: bool) {
        self.idle = idle;
        self.signals.set_idle(idle);
    }

    // === Accessors ===

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> CoreStatus {
        self.status
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn memory(&self) -> &Arc<MemoryController> {
        &self.memory
    }

    pub fn ports(&self) -> &Arc<PortBus> {
        &self.ports
    }

    /// Shared alive/idle flags
    pub fn signals(&self) -> Arc<CoreSignals> {
        Arc::clone(&self.signals)
    }

    pub fn icache(&self) -> &InstructionCache {
        &self.icache
    }

    pub fn dcache(&self) -> &DataCache {
        &self.dcache
    }

    /// Physical address of `offset` in the current data segment
    #[inline(always)]
    pub fn data_address(&self, offset: u16) -> u32 {
        segment_address(self.regs.ds, offset)
    }

    /// Write back every dirty data cache entry
    pub fn flush_data_cache(&mut self) -> Result<()> {
        self.dcache.flush()
    }

    /// Write back and drop cached words covering `address..address+len`
    ///
    /// Used by host code that writes memory directly on the core's behalf.
    pub fn invalidate_data(&mut self, address: u32, len: u32) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let last = address.saturating_add(len - 1);
        for page in page_index(address)..=page_index(last) {
            self.dcache.remove_page_references(page, true)?;
        }
        Ok(())
    }

    // === State ===

    /// Capture architectural state
    ///
    /// The data cache is written back first so memory is consistent with the
    /// captured registers.
    pub fn save_state(&mut self) -> Result<CoreState> {
        self.dcache.flush()?;
        Ok(CoreState {
            magic: CORE_STATE_MAGIC,
            version: STATE_VERSION,
            id: self.id,
            status: self.status,
            gpr: *self.regs.gprs(),
            fp: self.regs.fp,
            sp: self.regs.sp,
            ip: self.regs.ip,
            flags: self.regs.flags.bits(),
            cs: self.regs.cs,
            ds: self.regs.ds,
            cnt: self.regs.cnt,
            idle: self.idle,
            exit_code: self.exit_code,
            frames: self.frames.clone(),
            pending_irqs: self.pending_irqs.iter().copied().collect(),
        })
    }

    /// Restore architectural state
    ///
    /// Both caches are emptied without write-back.
    pub fn load_state(&mut self, state: &CoreState) -> Result<()> {
        save_state::check_header(state)?;
        if state.id != self.id {
            log::warn!("Core {} restoring state captured on core {}", self.id, state.id);
        }

        self.regs.set_gprs(state.gpr);
        self.regs.fp = state.fp;
        self.regs.sp = state.sp;
        self.regs.ip = state.ip;
        self.regs.flags = Flags::from_bits_truncate(state.flags);
        self.regs.cs = state.cs;
        self.regs.ds = state.ds;
        self.regs.cnt = state.cnt;
        self.status = state.status;
        self.exit_code = state.exit_code;
        self.frames = state.frames.clone();
        self.pending_irqs = state.pending_irqs.iter().copied().collect();
        self.current = None;
        self.icache.clear();
        self.dcache.discard();
        self.set_idle(state.idle);
        self.signals
            .set_alive(matches!(state.status, CoreStatus::Running | CoreStatus::Suspended));
        Ok(())
    }
}
