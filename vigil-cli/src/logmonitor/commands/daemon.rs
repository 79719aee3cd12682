//! `logmonitor daemon`: run the resident monitor in the foreground.

use anyhow::{Context, Result};

use vigil_core::LogMonitorConfig;
use vigil_logmon::start_blocking;

pub fn run(config: LogMonitorConfig) -> Result<()> {
    start_blocking(config).context("log monitor exited with error")
}
