use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RunConfig {
    /// Path to the boot ROM.
    #[arg(long)]
    pub bios: Option<PathBuf>,
    /// How many ticks to run, as fast as possible.
    ///
    /// Without it, the emulator runs in real time for `seconds`.
    #[arg(short, long, conflicts_with = "seconds")]
    pub ticks: Option<u64>,
    /// How many seconds to run in real time.
    #[arg(short, long, default_value_t = 1.0)]
    pub seconds: f64,
    /// EE instructions per tick
    #[arg(visible_alias("ipt"), long, default_value_t = 4096)]
    pub instructions_per_tick: u32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the system with idle processors.
    Run(RunConfig),
    /// Moves two words from the IOP to the EE through SIF0 and prints what arrived.
    SifDemo,
}

/// Cinnabar: dual-processor console emulator core
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to the log file.
    #[arg(long, default_value = "cinnabar.log")]
    pub log: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}
