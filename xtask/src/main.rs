use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "x")]
#[command(about = "Development tasks for the corvid emulator")]
struct Cli {
    #[command(subcommand)]
    command: Task,
}

#[derive(Subcommand)]
enum Task {
    /// fmt --check, clippy and the full test suite, stopping at the first failure
    Check,
    /// Format the workspace
    Fmt,
    /// Lint every target with warnings denied
    Clippy,
    /// Run tests, optionally for one emulator component
    Test {
        #[arg(value_enum)]
        component: Option<Component>,
    },
    /// Run the criterion benchmarks, optionally filtered by name
    Bench { filter: Option<String> },
    /// Run a program image through the corvid binary
    Run {
        image: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        cores: usize,
        #[arg(short = 'm', long, default_value_t = 1_000_000)]
        max_steps: u64,
        /// Write a snapshot here when the program stops
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        release: bool,
    },
}

/// Library modules that can be tested on their own
#[derive(Clone, Copy, ValueEnum)]
enum Component {
    Memory,
    Cpu,
    Interrupt,
    Loader,
    Storage,
    System,
    /// Only the end-to-end scenarios under tests/
    Scenarios,
}

impl Component {
    fn cargo_args(self) -> Vec<&'static str> {
        match self {
            Component::Memory => vec!["--lib", "core::memory"],
            Component::Cpu => vec!["--lib", "core::cpu"],
            Component::Interrupt => vec!["--lib", "core::interrupt"],
            Component::Loader => vec!["--lib", "core::loader"],
            Component::Storage => vec!["--lib", "core::storage"],
            Component::System => vec!["--lib", "core::system"],
            Component::Scenarios => vec!["--test", "integration_test"],
        }
    }
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Task::Check => check(),
        Task::Fmt => cargo(&["fmt", "--all"]),
        Task::Clippy => clippy(),
        Task::Test { component } => test(component),
        Task::Bench { filter } => {
            let mut args = vec!["bench", "--bench", "cpu_bench"];
            if let Some(filter) = filter.as_deref() {
                args.extend(["--", filter]);
            }
            cargo(&args)
        }
        Task::Run {
            image,
            cores,
            max_steps,
            snapshot,
            release,
        } => run(&image, cores, max_steps, snapshot, release),
    }
}

fn check() -> Result<()> {
    let started = Instant::now();
    let steps: [(&str, fn() -> Result<()>); 3] = [
        ("format", || cargo(&["fmt", "--all", "--", "--check"])),
        ("clippy", clippy),
        ("tests", || test(None)),
    ];

    for (name, step) in steps {
        println!("{} {}", "::".blue().bold(), name.bold());
        step().with_context(|| format!("{} failed", name))?;
    }

    println!(
        "{} all checks passed in {:.1}s",
        "ok".green().bold(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn clippy() -> Result<()> {
    cargo(&["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])
}

fn test(component: Option<Component>) -> Result<()> {
    let mut args = vec!["test"];
    if let Some(component) = component {
        args.extend(component.cargo_args());
    }
    cargo(&args)
}

fn run(
    image: &Path,
    cores: usize,
    max_steps: u64,
    snapshot: Option<PathBuf>,
    release: bool,
) -> Result<()> {
    if !image.is_file() {
        bail!("no program image at {}", image.display());
    }

    let mut cmd = Command::new("cargo");
    cmd.arg("run").arg("--quiet").args(["--bin", "corvid"]);
    if release {
        cmd.arg("--release");
    }
    cmd.arg("--")
        .arg(image)
        .args(["--cores", &cores.to_string()])
        .args(["--max-steps", &max_steps.to_string()]);
    if let Some(snapshot) = &snapshot {
        cmd.arg("--snapshot").arg(snapshot);
    }

    println!(
        "{} {} on {} core(s)",
        "::".blue().bold(),
        image.display().to_string().cyan(),
        cores
    );
    let started = Instant::now();
    let status = cmd.status()?;

    // corvid exits with the guest's exit code, or 2 when the host side failed
    match status.code() {
        None => bail!("corvid was killed: {}", status),
        Some(code) => println!(
            "{} exit code {} after {:.2}s",
            "::".blue().bold(),
            code.to_string().bold(),
            started.elapsed().as_secs_f64()
        ),
    }
    Ok(())
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        bail!("cargo {} exited with {}", args.join(" "), status);
    }
    Ok(())
}
