//! `logmonitor tail`: print the newest entries of a log.

use anyhow::{Context, Result};
use clap::Args;

use vigil_core::LogMonitorConfig;
use vigil_logmon::paths::{log_path, MAIN_LOG};
use vigil_logmon::protocol::DEFAULT_TAIL_LINES;
use vigil_logmon::{validate_log_name, Tail};

#[derive(Args, Debug)]
pub struct TailArgs {
    #[arg(short = 'n', long, default_value = MAIN_LOG)]
    pub name: String,

    /// Number of entries to show.
    #[arg(long, default_value_t = DEFAULT_TAIL_LINES)]
    pub lines: usize,
}

impl TailArgs {
    /// Reads the files directly; the daemon is not involved.
    pub fn run(self, config: &LogMonitorConfig) -> Result<()> {
        validate_log_name(&self.name)?;
        let tail = Tail::for_log(log_path(&config.dir, &self.name), self.lines);
        for entry in &tail {
            let entry = entry.with_context(|| format!("failed to read log '{}'", self.name))?;
            println!("{}", entry.to_line());
        }
        Ok(())
    }
}
