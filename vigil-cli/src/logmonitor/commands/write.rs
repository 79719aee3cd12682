//! `logmonitor write`: append one entry.

use anyhow::{Context, Result};
use clap::Args;

use vigil_core::{LogEntry, LogLevel, LogMonitorConfig, DEFAULT_TAG};
use vigil_logmon::paths::MAIN_LOG;
use vigil_logmon::{request_append, LogError, LogMonitor};

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Log name; the file is `<dir>/<name>.log`.
    #[arg(short = 'n', long, default_value = MAIN_LOG)]
    pub name: String,

    #[arg(short = 't', long, default_value = DEFAULT_TAG)]
    pub tag: String,

    #[arg(short = 'l', long, default_value = "info")]
    pub level: LogLevel,

    #[arg(short = 'm', long)]
    pub message: String,
}

impl WriteArgs {
    /// Goes through the daemon when one runs, otherwise writes in-process.
    pub fn run(self, config: &LogMonitorConfig) -> Result<()> {
        let entry = LogEntry::new(self.level, &self.tag, &self.message);
        let written = match request_append(&config.dir, &self.name, &entry) {
            Ok(written) => written,
            Err(LogError::DaemonNotRunning { .. }) => {
                let monitor = LogMonitor::open(config)?;
                let written = monitor.append(&self.name, &entry)?;
                monitor.close_all();
                written
            }
            Err(err) => return Err(err).context("failed to append log entry"),
        };
        if !written {
            tracing::debug!(level = %self.level, threshold = %config.level, "entry filtered");
        }
        Ok(())
    }
}
