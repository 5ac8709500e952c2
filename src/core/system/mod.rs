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

//! Machine integration
//!
//! The machine owns everything the cores share (memory controller, port bus,
//! virtual interrupt table, storage devices) and runs each booted core on its
//! own host thread. Cores talk to the outside world only through their
//! mailboxes on the [`MessageBus`].

pub mod bus;

pub use bus::{Message, MessageBus};

use super::config::MachineConfig;
use super::cpu::{BootState, CPUCore, CoreSignals, CoreStatus};
use super::error::{EmulatorError, Result};
use super::interrupt::{ints, VirtualInterruptTable, VECTOR_COUNT};
use super::loader::ProgramImage;
use super::memory::{segment_address, MemoryController, PageFlags, PortBus, PAGE_SHIFT, PAGE_SIZE};
use super::save_state::{self, MachineSnapshot};
use super::storage::{BlockIo, StorageRegistry};
use crossbeam::channel::{Receiver, TryRecvError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Symbol where secondary cores start
pub const SECONDARY_ENTRY: &str = "secondary";

/// Where a core lives
enum CoreSlot {
    /// Owned by the machine: not started, or joined
    Parked(CPUCore),
    /// Owned by its host thread
    Running(JoinHandle<CPUCore>),
    /// Lost to a panicked thread
    Empty,
}

/// A complete virtual machine
///
/// # Example
/// ```no_run
/// use corvid::core::config::MachineConfig;
/// use corvid::core::loader::ProgramImage;
/// use corvid::core::system::Machine;
///
/// let image = ProgramImage::load("program.img")?;
/// let mut machine = Machine::new(&MachineConfig::default(), &image)?;
/// let exit_code = machine.run()?;
/// # Ok::<(), corvid::core::error::EmulatorError>(())
/// ```
pub struct Machine {
    name: String,
    memory: Arc<MemoryController>,
    ports: Arc<PortBus>,
    storage: Arc<StorageRegistry>,
    cores: Vec<CoreSlot>,
    signals: Vec<Arc<CoreSignals>>,
    /// Present while cores are running
    bus: Option<MessageBus>,
    mailbox_capacity: usize,
    next_core: AtomicUsize,
    step_limit: Option<u64>,
    exit_code: i32,
}

impl Machine {
    /// Build a machine and load `image` into it
    ///
    /// Core 0 boots at the entry symbol with the program's stack. Every other
    /// core boots at [`SECONDARY_ENTRY`] on a stack page of its own if the
    /// image defines that symbol, and stays in reset otherwise. All cores
    /// boot privileged, with `R0` holding the core id.
    ///
    /// # Errors
    ///
    /// `Config` for an invalid configuration, `StorageAccess` if a storage
    /// file cannot be opened, and `ResourceExhausted` if the program or the
    /// secondary stacks do not fit in memory.
    pub fn new(config: &MachineConfig, image: &ProgramImage) -> Result<Self> {
        Self::with_interrupts(config, image, VirtualInterruptTable::new())
    }

    /// Like [`Machine::new`], with extra virtual interrupt handlers
    ///
    /// The block I/O handler is added at `ints::BLOCKIO` when storage devices
    /// are configured; registering something else there is a
    /// `ResourceConflict`.
    pub fn with_interrupts(
        config: &MachineConfig,
        image: &ProgramImage,
        mut vints: VirtualInterruptTable,
    ) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(StorageRegistry::from_config(&config.storage)?);
        if !storage.is_empty() {
            vints.register(ints::BLOCKIO, Arc::new(BlockIo::new(Arc::clone(&storage))))?;
        }

        let memory = Arc::new(MemoryController::new(config.memory.size)?);
        memory.boot()?;
        let program = memory.load_program(image, &config.cpu.entry_symbol)?;

        let ports = Arc::new(PortBus::new());
        let vints = Arc::new(vints);
        let secondary = program.symbol(SECONDARY_ENTRY);

        let mut cores = Vec::with_capacity(config.cpu.cores);
        let mut signals = Vec::with_capacity(config.cpu.cores);
        for id in 0..config.cpu.cores {
            let mut core = CPUCore::new(
                id as u32,
                Arc::clone(&memory),
                Arc::clone(&ports),
                Arc::clone(&vints),
                &config.cpu,
            );

            let boot = if id == 0 {
                Some(BootState::from(&program))
            } else {
                match secondary {
                    Some(ip) => {
                        let sp = Self::alloc_stack(&memory, program.ds)?;
                        Some(BootState {
                            cs: program.cs,
                            ds: program.ds,
                            ip,
                            sp,
                            fp: sp,
                            privileged: true,
                        })
                    }
                    None => None,
                }
            };
            if let Some(boot) = boot {
                core.boot(boot.privileged(true));
                core.registers_mut().set_gpr(0, id as u16);
            }

            signals.push(core.signals());
            cores.push(CoreSlot::Parked(core));
        }

        if secondary.is_none() && config.cpu.cores > 1 {
            log::info!(
                "No '{}' symbol, {} secondary core(s) stay in reset",
                SECONDARY_ENTRY,
                config.cpu.cores - 1
            );
        }

        Ok(Self {
            name: String::from("<memory>"),
            memory,
            ports,
            storage,
            cores,
            signals,
            bus: None,
            mailbox_capacity: config.cpu.mailbox_capacity,
            next_core: AtomicUsize::new(0),
            step_limit: None,
            exit_code: 0,
        })
    }

    /// One read+write page in `segment`, returning the stack top offset
    fn alloc_stack(memory: &MemoryController, segment: u8) -> Result<u16> {
        let page = memory.alloc_page(Some(segment))?;
        let bottom = page << PAGE_SHIFT;
        memory.update_area_flags(
            bottom,
            PAGE_SIZE as u32,
            PageFlags::READ | PageFlags::WRITE,
            true,
        )?;
        let top = bottom + PAGE_SIZE as u32 - segment_address(segment, 0);
        Ok(top as u16)
    }

    /// Name recorded in snapshots
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Halt each core after it has executed `limit` instructions
    ///
    /// Takes effect on the next [`Machine::start`].
    pub fn set_step_limit(&mut self, limit: Option<u64>) {
        self.step_limit = limit;
    }

    pub fn memory(&self) -> &Arc<MemoryController> {
        &self.memory
    }

    /// Port bus, for registering devices before the machine starts
    pub fn ports(&self) -> &Arc<PortBus> {
        &self.ports
    }

    pub fn storage(&self) -> &Arc<StorageRegistry> {
        &self.storage
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    /// A core that is not running on a thread
    pub fn core(&self, id: usize) -> Option<&CPUCore> {
        match self.cores.get(id)? {
            CoreSlot::Parked(core) => Some(core),
            _ => None,
        }
    }

    pub fn core_mut(&mut self, id: usize) -> Option<&mut CPUCore> {
        match self.cores.get_mut(id)? {
            CoreSlot::Parked(core) => Some(core),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.bus.is_some()
    }

    /// Maximum exit code over booted cores, as of the last [`Machine::wait`]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    // === Execution ===

    /// Spawn a host thread for every living core
    ///
    /// # Errors
    ///
    /// `CpuException` if the machine is already running, `Io` if a thread
    /// cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.bus.is_some() {
            return Err(EmulatorError::CpuException("machine already running".into()));
        }

        let (bus, receivers) = MessageBus::new(self.cores.len(), self.mailbox_capacity);
        for (id, mailbox) in receivers.into_iter().enumerate() {
            let slot = std::mem::replace(&mut self.cores[id], CoreSlot::Empty);
            self.cores[id] = match slot {
                CoreSlot::Parked(core)
                    if matches!(core.status(), CoreStatus::Running | CoreStatus::Suspended) =>
                {
                    let limit = self.step_limit;
                    let handle = thread::Builder::new()
                        .name(format!("core-{}", id))
                        .spawn(move || core_loop(core, mailbox, limit));
                    match handle {
                        Ok(handle) => CoreSlot::Running(handle),
                        Err(e) => {
                            // The core moved into the failed closure and is gone
                            bus.close(id);
                            self.bus = Some(bus);
                            self.halt_all();
                            let _ = self.join_all();
                            return Err(e.into());
                        }
                    }
                }
                other => {
                    bus.close(id);
                    other
                }
            };
        }

        log::info!("Machine started with {} core(s)", self.cores.len());
        self.bus = Some(bus);
        Ok(())
    }

    /// Wait for core 0 to halt, then halt the rest
    ///
    /// Returns the machine exit code: the maximum over every booted core.
    /// Storage devices are flushed afterwards.
    ///
    /// # Errors
    ///
    /// `CpuException` if a core thread panicked.
    pub fn wait(&mut self) -> Result<i32> {
        if self.bus.is_none() {
            return Ok(self.exit_code);
        }

        let mut result = self.join(0);
        self.halt_all();
        let rest = self.join_all();
        result = result.and(rest);
        self.bus = None;
        self.storage.flush_all();

        self.exit_code = self
            .cores
            .iter()
            .filter_map(|slot| match slot {
                CoreSlot::Parked(core) if core.status() != CoreStatus::Reset => {
                    Some(core.exit_code())
                }
                _ => None,
            })
            .max()
            .unwrap_or(0);
        log::info!("Machine stopped (exit code {})", self.exit_code);
        result.map(|()| self.exit_code)
    }

    /// [`Machine::start`] then [`Machine::wait`]
    pub fn run(&mut self) -> Result<i32> {
        self.start()?;
        self.wait()
    }

    fn join(&mut self, id: usize) -> Result<()> {
        let Some(slot) = self.cores.get_mut(id) else {
            return Ok(());
        };
        match std::mem::replace(slot, CoreSlot::Empty) {
            CoreSlot::Running(handle) => match handle.join() {
                Ok(core) => {
                    *slot = CoreSlot::Parked(core);
                    Ok(())
                }
                Err(_) => {
                    log::error!("Core {} thread panicked", id);
                    Err(EmulatorError::CpuException(format!("core {} thread panicked", id)))
                }
            },
            other => {
                *slot = other;
                Ok(())
            }
        }
    }

    fn join_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        for id in 0..self.cores.len() {
            if let Err(e) = self.join(id) {
                result = Err(e);
            }
        }
        result
    }

    // === Messaging ===

    /// Raise hardware IRQ `index`
    ///
    /// The first idle living core receives it, otherwise living cores take
    /// turns. Before [`Machine::start`] the IRQ is queued on the chosen core
    /// directly.
    ///
    /// # Errors
    ///
    /// `CpuException` for an index outside the vector table,
    /// `ResourceNotFound` if no core is alive.
    pub fn irq(&mut self, index: u8) -> Result<()> {
        if usize::from(index) >= VECTOR_COUNT {
            return Err(EmulatorError::CpuException(format!(
                "IRQ {} outside the vector table",
                index
            )));
        }

        let target = self
            .pick_core()
            .ok_or_else(|| EmulatorError::ResourceNotFound(format!("living core for IRQ {}", index)))?;
        log::debug!("Routing IRQ {} to core {}", index, target);

        match &self.bus {
            Some(bus) => {
                if !bus.send(target, Message::Irq(index))? {
                    log::warn!("IRQ {} dropped: core {} halted", index, target);
                }
                Ok(())
            }
            None => match &mut self.cores[target] {
                CoreSlot::Parked(core) => {
                    core.deliver_irq(index);
                    Ok(())
                }
                _ => Err(EmulatorError::ResourceNotFound(format!("core {}", target))),
            },
        }
    }

    fn pick_core(&self) -> Option<usize> {
        let alive: Vec<usize> = (0..self.signals.len())
            .filter(|&id| self.signals[id].is_alive())
            .collect();
        if alive.is_empty() {
            return None;
        }
        if let Some(&idle) = alive.iter().find(|&&id| self.signals[id].is_idle()) {
            return Some(idle);
        }
        let turn = self.next_core.fetch_add(1, Ordering::Relaxed);
        Some(alive[turn % alive.len()])
    }

    /// Suspend every running core and wait until all have
    pub fn suspend_all(&mut self) {
        if let Some(bus) = &self.bus {
            bus.suspend_all();
            return;
        }
        self.parked().for_each(CPUCore::suspend);
    }

    /// Resume every suspended core and wait until all have
    pub fn wake_up_all(&mut self) {
        if let Some(bus) = &self.bus {
            bus.wake_up_all();
            return;
        }
        self.parked().for_each(CPUCore::wake_up);
    }

    /// Halt every core and wait until all have
    ///
    /// Halting an already halted core is harmless.
    pub fn halt_all(&mut self) {
        if let Some(bus) = &self.bus {
            bus.halt_all();
            return;
        }
        for core in self.parked() {
            if core.status() != CoreStatus::Reset {
                halt_core(core);
            }
        }
    }

    fn parked(&mut self) -> impl Iterator<Item = &mut CPUCore> {
        self.cores.iter_mut().filter_map(|slot| match slot {
            CoreSlot::Parked(core) => Some(core),
            _ => None,
        })
    }

    // === State ===

    /// Capture every core and memory
    ///
    /// # Errors
    ///
    /// `CpuException` while the machine is running.
    pub fn snapshot(&mut self) -> Result<MachineSnapshot> {
        self.require_parked("snapshot")?;
        let mut cores = Vec::with_capacity(self.cores.len());
        for core in self.parked() {
            cores.push(core.save_state()?);
        }
        let memory = self.memory.save_state();
        Ok(MachineSnapshot::new(&self.name, cores, memory))
    }

    /// Restore a snapshot taken on a machine of the same shape
    ///
    /// # Errors
    ///
    /// `CpuException` while running, `MalformedState` for a bad header or a
    /// core count that does not match.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> Result<()> {
        self.require_parked("restore")?;
        save_state::check_header(snapshot)?;
        if snapshot.cores.len() != self.cores.len() {
            return Err(EmulatorError::MalformedState(format!(
                "snapshot has {} cores, machine has {}",
                snapshot.cores.len(),
                self.cores.len()
            )));
        }

        self.memory.load_state(&snapshot.memory)?;
        for (core, state) in self.parked().zip(&snapshot.cores) {
            core.load_state(state)?;
        }
        self.name = snapshot.metadata.image.clone();
        log::info!(
            "Restored snapshot of '{}' taken {}",
            snapshot.metadata.image,
            snapshot.metadata.timestamp
        );
        Ok(())
    }

    fn require_parked(&self, what: &str) -> Result<()> {
        let parked = self
            .cores
            .iter()
            .all(|slot| matches!(slot, CoreSlot::Parked(_)));
        if self.bus.is_some() || !parked {
            return Err(EmulatorError::CpuException(format!(
                "cannot {} a running machine",
                what
            )));
        }
        Ok(())
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if self.bus.is_some() {
            self.halt_all();
            let _ = self.join_all();
        }
    }
}

/// Body of a core's host thread
///
/// Runs until the core halts, by instruction, fault, `Halt` message or step
/// limit, and hands the core back.
fn core_loop(mut core: CPUCore, mailbox: Receiver<Message>, step_limit: Option<u64>) -> CPUCore {
    let mut steps = 0u64;
    log::debug!("Core {} thread started", core.id());

    while core.status() != CoreStatus::Halted {
        let message = if core.is_waiting() {
            mailbox.recv().ok()
        } else {
            match mailbox.try_recv() {
                Ok(message) => Some(message),
                Err(TryRecvError::Empty) => {
                    if step_limit.is_some_and(|limit| steps >= limit) {
                        log::warn!("Core {} reached the step limit ({})", core.id(), steps);
                        halt_core(&mut core);
                        break;
                    }
                    // A fault has already halted the core
                    let _ = core.step();
                    steps += 1;
                    continue;
                }
                Err(TryRecvError::Disconnected) => None,
            }
        };

        match message {
            Some(Message::Irq(index)) => core.deliver_irq(index),
            Some(Message::Suspend(_token)) => core.suspend(),
            Some(Message::WakeUp(_token)) => core.wake_up(),
            Some(Message::Halt(_token)) => halt_core(&mut core),
            None => {
                log::warn!("Core {} lost its mailbox", core.id());
                halt_core(&mut core);
            }
        }
    }

    // Release tokens of anything that arrived after the halt
    while mailbox.try_recv().is_ok() {}
    log::debug!("Core {} thread finished", core.id());
    core
}

fn halt_core(core: &mut CPUCore) {
    if let Err(e) = core.halt() {
        log::warn!("Core {}: write-back failed while halting: {}", core.id(), e);
    }
}

#[cfg(test)]
mod tests;
