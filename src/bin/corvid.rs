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

//! corvid command line runner
//!
//! Loads a program image, runs it on a machine until core 0 halts and exits
//! with the machine's exit code.

use clap::Parser;
use corvid::core::config::MachineConfig;
use corvid::core::error::Result;
use corvid::core::loader::ProgramImage;
use corvid::core::memory::{ports, TtyPort};
use corvid::core::system::Machine;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

/// Multi-core 16-bit virtual machine
#[derive(Parser)]
#[command(name = "corvid")]
#[command(about = "Run a program image on the corvid virtual machine", long_about = None)]
struct Args {
    /// Program image to load
    image: PathBuf,

    /// Machine configuration (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of cores, overriding the configuration
    #[arg(short = 'n', long)]
    cores: Option<usize>,

    /// Halt each core after this many instructions
    #[arg(short = 'm', long)]
    max_steps: Option<u64>,

    /// Write a binary snapshot of the final machine state
    #[arg(short = 's', long)]
    snapshot: Option<PathBuf>,

    /// Write the final machine state as JSON
    #[arg(short = 'd', long)]
    dump_state: Option<PathBuf>,
}

fn run(args: &Args) -> Result<i32> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::from_file(path)?,
        None => MachineConfig::default(),
    };
    if let Some(cores) = args.cores {
        config.cpu.cores = cores;
    }

    info!("Loading program image from: {}", args.image.display());
    let image = ProgramImage::load(&args.image)?;

    let mut machine = Machine::new(&config, &image)?;
    machine.set_name(args.image.display().to_string());
    machine.set_step_limit(args.max_steps);
    machine
        .ports()
        .register(ports::CONSOLE, Arc::new(TtyPort::new(std::io::stdout())))?;

    info!("Starting machine with {} core(s)...", config.cpu.cores);
    let exit_code = machine.run()?;

    if args.snapshot.is_some() || args.dump_state.is_some() {
        let snapshot = machine.snapshot()?;
        if let Some(path) = &args.snapshot {
            snapshot.save_to_file(path)?;
        }
        if let Some(path) = &args.dump_state {
            snapshot.save_json(path)?;
            info!("Dumped machine state to {}", path.display());
        }
    }

    Ok(exit_code)
}

fn main() {
    // Optional .env for RUST_LOG and friends
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("corvid v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    match run(&args) {
        Ok(exit_code) => {
            info!("Exit code: {}", exit_code);
            println!("exit code {}", exit_code);
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}
