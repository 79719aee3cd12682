//! `logmonitor batch`: append `LEVEL|MESSAGE` lines as one contiguous batch.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use vigil_core::LogMonitorConfig;
use vigil_logmon::paths::MAIN_LOG;
use vigil_logmon::{parse_batch, request_batch, LogError, LogMonitor};

#[derive(Args, Debug)]
pub struct BatchArgs {
    #[arg(short = 'n', long, default_value = MAIN_LOG)]
    pub name: String,

    /// Input file, or `-` for stdin.
    #[arg(short = 'f', long, default_value = "-")]
    pub file: PathBuf,

    #[arg(short = 't', long, default_value = "batch")]
    pub tag: String,
}

impl BatchArgs {
    pub fn run(self, config: &LogMonitorConfig) -> Result<()> {
        let input = read_input(&self.file)?;
        let parsed = parse_batch(&input, &self.tag);
        for (line, problem) in &parsed.problems {
            eprintln!("line {line}: {problem}");
        }

        let written = match request_batch(&config.dir, &self.name, &self.tag, &parsed.entries) {
            Ok(written) => written,
            Err(LogError::DaemonNotRunning { .. }) => {
                let monitor = LogMonitor::open(config)?;
                let written = monitor.append_batch(&self.name, &parsed.entries)?;
                monitor.close_all();
                written
            }
            Err(err) => return Err(err).context("failed to append batch"),
        };
        println!("{written} entries written");
        Ok(())
    }
}

fn read_input(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("failed to read batch from stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}
