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

//! Test fixtures for common test scenarios

use corvid::core::config::MachineConfig;
use corvid::core::cpu::decode::Instruction;
use corvid::core::loader::ProgramImage;
use corvid::core::system::Machine;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Offset of the zeroed scratch area every test image carries
pub const DATA: u16 = 0x1000;

/// Image with `program` at offset 0, a scratch area and a stack
#[allow(dead_code)]
pub fn image(program: &[Instruction]) -> ProgramImage {
    image_with_secondary(program, &[])
}

/// Like [`image`], with `secondary` appended and marked as the secondary
/// core entry point when it is not empty
#[allow(dead_code)]
pub fn image_with_secondary(program: &[Instruction], secondary: &[Instruction]) -> ProgramImage {
    let mut words: Vec<u32> = program.iter().map(Instruction::encode).collect();
    let mut image = ProgramImage::new();
    if !secondary.is_empty() {
        image = image.with_symbol("secondary", (words.len() * 4) as u16, 0, 0);
        words.extend(secondary.iter().map(Instruction::encode));
    }
    image
        .with_symbol("main", 0, 0, 0)
        .with_text(0, &words)
        .with_bss(u32::from(DATA), 0x100)
        .with_stack(256)
}

/// Configuration with `cores` cores and defaults otherwise
#[allow(dead_code)]
pub fn config(cores: usize) -> MachineConfig {
    let mut config = MachineConfig::default();
    config.cpu.cores = cores;
    config
}

/// Build a machine with a safety step limit so a broken program cannot hang
/// the test run
#[allow(dead_code)]
pub fn machine(cores: usize, image: &ProgramImage) -> Machine {
    let mut machine = Machine::new(&config(cores), image).expect("Failed to build machine");
    machine.set_step_limit(Some(1_000_000));
    machine
}

/// Run `program` on one core and return the exit code
#[allow(dead_code)]
pub fn run_program(program: &[Instruction]) -> i32 {
    machine(1, &image(program))
        .run()
        .expect("Machine failed")
}

/// Cloneable writer collecting console output
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[allow(dead_code)]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
