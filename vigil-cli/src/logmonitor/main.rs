//! logmonitor: size-bounded logging sink with one-generation rotation.
//!
//! # Usage
//!
//! ```text
//! logmonitor [--dir DIR] [--config FILE] [--max-bytes N] [--level LEVEL] <command>
//!
//! logmonitor daemon
//! logmonitor write -n NAME -t TAG -l LEVEL -m MESSAGE
//! logmonitor batch -n NAME -f FILE
//! logmonitor tail -n NAME --lines N
//! logmonitor rotate -n NAME
//! logmonitor flush | clean | stop
//! logmonitor status [--json]
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{
    admin::RotateArgs, batch::BatchArgs, status::StatusArgs, tail::TailArgs, write::WriteArgs,
};
use vigil_core::{config, Config, LogLevel, LogMonitorConfig};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "logmonitor",
    version,
    about = "Append-only, size-bounded log files with one rotated generation",
    long_about = None,
)]
struct Cli {
    /// Log directory (default: platform data directory).
    #[arg(long, env = "VIGIL_LOG_DIR")]
    dir: Option<PathBuf>,

    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rotate a log once it would grow past this many bytes.
    #[arg(long)]
    max_bytes: Option<u64>,

    /// Drop entries more verbose than this (error, warn, info, debug or 1-4).
    #[arg(long)]
    level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the resident monitor until SIGTERM/SIGINT or `stop`.
    Daemon,

    /// Append one entry.
    Write(WriteArgs),

    /// Append `LEVEL|MESSAGE` lines from a file as one batch.
    Batch(BatchArgs),

    /// Print the newest entries of a log.
    Tail(TailArgs),

    /// Rotate a log now.
    Rotate(RotateArgs),

    /// Fsync every log the daemon has open.
    Flush,

    /// Delete every log file in the directory.
    Clean,

    /// Show the logs in the directory and whether the daemon runs.
    Status(StatusArgs),

    /// Ask the daemon to shut down.
    Stop,
}

impl Cli {
    /// File values first, then flags; validated after merging.
    fn monitor_config(&self) -> Result<LogMonitorConfig> {
        let mut file = match &self.config {
            Some(path) => config::load_at(path)?,
            None => Config::default(),
        };
        let monitor = &mut file.logmonitor;
        if let Some(dir) = &self.dir {
            monitor.dir = dir.clone();
        }
        if let Some(max_bytes) = self.max_bytes {
            monitor.max_bytes = max_bytes;
        }
        if let Some(level) = self.level {
            monitor.level = level;
        }
        monitor.validate()?;
        Ok(file.logmonitor)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    vigil_logmon::init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli
        .monitor_config()
        .context("invalid log monitor configuration")?;
    match cli.command {
        Commands::Daemon => commands::daemon::run(config),
        Commands::Write(args) => args.run(&config),
        Commands::Batch(args) => args.run(&config),
        Commands::Tail(args) => args.run(&config),
        Commands::Rotate(args) => args.run(&config),
        Commands::Flush => commands::admin::flush(&config),
        Commands::Clean => commands::admin::clean(&config),
        Commands::Status(args) => args.run(&config),
        Commands::Stop => commands::admin::stop(&config),
    }
}
