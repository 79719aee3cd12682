//! filewatcher: print a line per change under the given paths.
//!
//! # Usage
//!
//! ```text
//! filewatcher [PATHS]... [--config FILE] [-e create,modify,delete,rename] [-r]
//!             [--debounce-ms N] [-p MS] [--mode auto|native|poll]
//!             [--drain deliver|discard] [-o] [-x CMD]
//!             [--log-dir DIR] [--log-name NAME]
//! ```
//!
//! Each event is written to stdout as `<timestamp> <kind> <path>`.
//! Diagnostics go to stderr.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::process::Command;

use vigil_core::{
    config, Config, DrainPolicy, EventKind, Interest, LogEntry, LogLevel, SourceMode, WatchEvent,
    WatchTarget, WatcherConfig,
};
use vigil_logmon::{request_append, validate_log_name, wait_for_shutdown_signal, LogError};
use vigil_watch::{WatchError, Watcher};

const FORWARD_TAG: &str = "filewatcher";

#[derive(Parser, Debug)]
#[command(
    name = "filewatcher",
    version,
    about = "Watch files and directories and report changes line by line",
    long_about = None,
)]
struct Cli {
    /// Files or directories to watch, in addition to configured targets.
    paths: Vec<PathBuf>,

    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated event kinds for PATHS (default: all).
    #[arg(short = 'e', long, value_parser = Interest::parse_list)]
    events: Option<BTreeSet<Interest>>,

    /// Watch directories in PATHS recursively.
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Coalescing window for repeated modifications; 0 disables it.
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Scan interval when polling.
    #[arg(short = 'p', long)]
    poll_interval_ms: Option<u64>,

    #[arg(long)]
    mode: Option<SourceMode>,

    /// What to do with pending events on shutdown.
    #[arg(long)]
    drain: Option<DrainPolicy>,

    /// Exit after the first event.
    #[arg(short = 'o', long)]
    once: bool,

    /// Run `sh -c CMD` for every event with FILE and EVENT exported.
    #[arg(short = 'x', long = "exec", value_name = "CMD")]
    exec: Option<String>,

    /// Forward events to the log monitor running in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, default_value = "filewatcher")]
    log_name: String,
}

impl Cli {
    fn watcher_config(&self) -> Result<WatcherConfig> {
        let mut watcher = match &self.config {
            Some(path) => config::load_at(path)?.watcher,
            None => Config::default().watcher,
        };
        if let Some(debounce_ms) = self.debounce_ms {
            watcher.debounce_ms = debounce_ms;
        }
        if let Some(poll_interval_ms) = self.poll_interval_ms {
            watcher.poll_interval_ms = poll_interval_ms;
        }
        if let Some(mode) = self.mode {
            watcher.mode = mode;
        }
        if let Some(drain) = self.drain {
            watcher.drain = drain;
        }
        for path in &self.paths {
            let mut target = WatchTarget::new(path).recursive(self.recursive);
            if let Some(events) = &self.events {
                target = target.with_events(events.iter().copied());
            }
            watcher.targets.push(target);
        }
        watcher.validate()?;
        watcher.require_targets()?;
        Ok(watcher)
    }
}

// ---------------------------------------------------------------------------
// Log monitor forwarding
// ---------------------------------------------------------------------------

struct Forwarder {
    dir: PathBuf,
    log: String,
    warned: bool,
}

impl Forwarder {
    async fn send(&mut self, level: LogLevel, message: String) {
        let dir = self.dir.clone();
        let log = self.log.clone();
        let entry = LogEntry::new(level, FORWARD_TAG, message);
        let sent = tokio::task::spawn_blocking(move || request_append(&dir, &log, &entry)).await;
        match sent {
            Ok(Ok(_)) => {}
            Ok(Err(LogError::DaemonNotRunning { socket })) => {
                if !self.warned {
                    tracing::warn!(socket = %socket.display(), "log monitor is not running; not forwarding");
                    self.warned = true;
                }
            }
            Ok(Err(err)) => tracing::warn!(error = %err, "forwarding to log monitor failed"),
            Err(err) => tracing::error!(error = %err, "forwarding task failed"),
        }
    }

    async fn event(&mut self, event: &WatchEvent) {
        let level = match event.kind {
            EventKind::Gone => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.send(level, format!("{} {}", event.kind, event.path.display()))
            .await;
    }

    async fn failures(&mut self, failures: &[WatchError]) {
        for failure in failures {
            self.send(LogLevel::Error, failure.to_string()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    vigil_logmon::init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli
        .watcher_config()
        .context("invalid watcher configuration")?;
    let mut forwarder = match &cli.log_dir {
        Some(dir) => {
            validate_log_name(&cli.log_name)?;
            Some(Forwarder {
                dir: dir.clone(),
                log: cli.log_name.clone(),
                warned: false,
            })
        }
        None => None,
    };

    let mut watcher = Watcher::new(config.clone());
    let watched = watcher.watch(&config.targets);
    for failure in watcher.failures() {
        tracing::error!(error = %failure, "watch target failed");
    }
    if let Some(forwarder) = forwarder.as_mut() {
        forwarder.failures(watcher.failures()).await;
    }
    let mut stream = watched.context("nothing to watch")?;

    let stop = watcher.stop_handle();
    let signals = tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal) => tracing::info!(signal, "shutdown signal received"),
            Err(err) => tracing::error!(error = %err, "signal handler failed"),
        }
        stop.stop();
    });

    while let Some(event) = stream.next().await {
        println!("{}", event.to_line());
        if let Some(forwarder) = forwarder.as_mut() {
            forwarder.event(&event).await;
        }
        if let Some(command) = &cli.exec {
            run_hook(command, &event).await;
        }
        if cli.once {
            break;
        }
    }

    signals.abort();
    watcher.stop().await;
    Ok(())
}

/// Hook failures are reported and do not stop the watcher.
async fn run_hook(command: &str, event: &WatchEvent) {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("FILE", &event.path)
        .env("EVENT", event.kind.to_string())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!(%status, command, "hook exited unsuccessfully"),
        Err(err) => tracing::warn!(error = %err, command, "hook could not be started"),
    }
}
