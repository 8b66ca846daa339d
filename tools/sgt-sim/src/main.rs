//! # sgt-sim
//!
//! Drives the scatter-gather table allocator against simulated physical RAM
//! through the same opcode interface a device driver would expose.
//!
//! ```bash
//! # The classic walkthrough: capacity, two reservations, two releases
//! sgt-sim demo
//!
//! # A custom sequence with fault injection after 100 data pages
//! sgt-sim --fail-after 100 run reserve=50K circular=1M unreserve=1 unreserve-all
//!
//! # Show the chain of one buffer
//! sgt-sim --log-level debug inspect 5M --circular
//! ```

mod inspect;
mod logger;
mod script;
mod session;

use crate::logger::StderrLogger;
use crate::script::{Step, parse_size};
use crate::session::{Device, Session};
use clap::{Parser, Subcommand, ValueEnum};
use kernel_alloc::{BitmapFrameAlloc, FailAfter, SimulatedRam};
use kernel_sgt::layout::PAGE_SIZE;
use kernel_sgt::{BufferMode, RollbackScope, SgtAllocator, SgtConfig};
use log::{LevelFilter, error, info};
use std::process::ExitCode;

/// Scatter-gather table allocator simulator
#[derive(Parser, Debug)]
#[command(name = "sgt-sim", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Size of the simulated RAM in MiB
    #[arg(long, global = true, default_value_t = 512)]
    ram_mib: u64,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: LevelFilter,

    /// Fail single-page allocations after this many have succeeded
    #[arg(long, global = true)]
    fail_after: Option<u64>,

    /// Which reservations to tear down when one fails
    #[arg(long, global = true, value_enum, default_value_t = Rollback::All)]
    rollback: Rollback,

    /// Largest index run, as a power-of-two page count
    #[arg(long, global = true, default_value_t = SgtConfig::new().max_run_order)]
    max_run_order: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query capacity, reserve 50K and 400M, release the second, release all
    Demo,

    /// Run a sequence of steps (capacity, reserve=SIZE, circular=SIZE, unreserve=N, unreserve-all)
    Run {
        #[arg(required = true)]
        steps: Vec<Step>,
    },

    /// Reserve one buffer and print its table chain
    Inspect {
        /// Buffer size, e.g. 50K or 8M
        #[arg(value_parser = parse_size)]
        size: u64,

        /// Build a circular buffer
        #[arg(long)]
        circular: bool,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug)]
enum Rollback {
    All,
    Failing,
}

impl From<Rollback> for RollbackScope {
    fn from(value: Rollback) -> Self {
        match value {
            Rollback::All => Self::All,
            Rollback::Failing => Self::Failing,
        }
    }
}

fn demo_steps() -> Vec<Step> {
    vec![
        Step::Capacity,
        Step::Reserve {
            size: 50 * 1024,
            mode: BufferMode::Linear,
        },
        Step::Reserve {
            size: 400 * 1024 * 1024,
            mode: BufferMode::Linear,
        },
        Step::Unreserve { handle: 2 },
        Step::UnreserveAll,
    ]
}

fn run_steps(device: &Device<'_>, steps: Vec<Step>) -> ExitCode {
    let mut session = Session::new(device);
    for step in steps {
        match session.run(step) {
            Ok(line) => println!("{line}"),
            Err(e) => {
                error!("{e}");
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    for (n, address) in session.live() {
        println!("Still reserved: #{n} at {address}");
    }
    ExitCode::SUCCESS
}

fn inspect_chain(device: &Device<'_>, ram: &SimulatedRam, size: u64, mode: BufferMode) -> ExitCode {
    match device.reserve(size, mode) {
        Ok(address) => {
            println!("Table at {address}");
            print!("{}", inspect::walk(ram, address));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e} (errno {})", e.errno());
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = StderrLogger::new(cli.log_level).init() {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let pages = cli.ram_mib.saturating_mul(1024 * 1024) / PAGE_SIZE;
    let ram = match SimulatedRam::new(SimulatedRam::DEFAULT_BASE, pages) {
        Ok(ram) => ram,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let pool = FailAfter::disarmed(BitmapFrameAlloc::for_ram(&ram));
    if let Some(budget) = cli.fail_after {
        pool.arm(budget);
    }

    let config = SgtConfig::new()
        .with_rollback(cli.rollback.into())
        .with_max_run_order(cli.max_run_order);
    let device = SgtAllocator::with_config(&pool, &ram, config);
    info!("{} MiB of simulated RAM at {}", cli.ram_mib, ram.base());

    let status = match cli.command {
        Command::Demo => run_steps(&device, demo_steps()),
        Command::Run { steps } => run_steps(&device, steps),
        Command::Inspect { size, circular } => {
            inspect_chain(&device, &ram, size, BufferMode::from_circular(circular))
        }
    };

    drop(device);
    let leaked = ram.pages() - pool.inner().available_pages();
    if leaked > 0 {
        error!("{leaked} pages still allocated after shutdown");
        return ExitCode::FAILURE;
    }
    status
}
