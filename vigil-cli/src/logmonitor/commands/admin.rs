//! `logmonitor rotate|flush|clean|stop`: maintenance commands.

use anyhow::{Context, Result};
use clap::Args;

use vigil_core::LogMonitorConfig;
use vigil_logmon::paths::MAIN_LOG;
use vigil_logmon::{
    request_clean, request_flush, request_rotate, request_stop, LogError, LogMonitor,
};

#[derive(Args, Debug)]
pub struct RotateArgs {
    #[arg(short = 'n', long, default_value = MAIN_LOG)]
    pub name: String,
}

impl RotateArgs {
    pub fn run(self, config: &LogMonitorConfig) -> Result<()> {
        match request_rotate(&config.dir, &self.name) {
            Ok(()) => {}
            Err(LogError::DaemonNotRunning { .. }) => {
                let monitor = LogMonitor::open(config)?;
                monitor.rotate(&self.name)?;
                monitor.close_all();
            }
            Err(err) => return Err(err).context("failed to rotate log"),
        }
        println!("rotated {}", self.name);
        Ok(())
    }
}

pub fn flush(config: &LogMonitorConfig) -> Result<()> {
    match request_flush(&config.dir) {
        Ok(()) => println!("flushed"),
        // Nothing is buffered without a daemon.
        Err(LogError::DaemonNotRunning { .. }) => println!("log monitor is not running"),
        Err(err) => return Err(err).context("failed to flush logs"),
    }
    Ok(())
}

pub fn clean(config: &LogMonitorConfig) -> Result<()> {
    let removed = match request_clean(&config.dir) {
        Ok(removed) => removed,
        Err(LogError::DaemonNotRunning { .. }) => LogMonitor::open(config)?.clean()?,
        Err(err) => return Err(err).context("failed to clean logs"),
    };
    println!("removed {removed} log files");
    Ok(())
}

pub fn stop(config: &LogMonitorConfig) -> Result<()> {
    match request_stop(&config.dir) {
        Ok(()) => println!("log monitor stop requested"),
        Err(LogError::DaemonNotRunning { .. }) => println!("log monitor is not running"),
        Err(err) => return Err(err).context("failed to stop log monitor"),
    }
    Ok(())
}
