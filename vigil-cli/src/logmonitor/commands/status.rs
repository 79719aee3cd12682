//! `logmonitor status`: logs in the directory and daemon liveness.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use vigil_core::{LogLevel, LogMonitorConfig};
use vigil_logmon::paths::socket_path;
use vigil_logmon::{request_status, LogError, LogMonitor, LogStatus};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    running: bool,
    pid: Option<u32>,
    dir: String,
    socket: String,
    started_at: Option<String>,
    level: LogLevel,
    max_bytes: u64,
    logs: Vec<LogStatus>,
}

#[derive(Tabled)]
struct LogTableRow {
    #[tabled(rename = "log")]
    name: String,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "rotated")]
    rotated: String,
    #[tabled(rename = "rotations")]
    rotations: u64,
    #[tabled(rename = "open")]
    open: String,
}

impl StatusArgs {
    pub fn run(self, config: &LogMonitorConfig) -> Result<()> {
        let report = build_report(config)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(report);
        Ok(())
    }
}

fn build_report(config: &LogMonitorConfig) -> Result<StatusReport> {
    match request_status(&config.dir) {
        Ok(status) => Ok(StatusReport {
            running: true,
            pid: Some(status.pid),
            dir: status.dir,
            socket: status.socket,
            started_at: Some(status.started_at),
            level: status.level,
            max_bytes: status.max_bytes,
            logs: status.logs,
        }),
        Err(LogError::DaemonNotRunning { .. }) => {
            let logs = if config.dir.is_dir() {
                LogMonitor::open(config)?.status()?
            } else {
                Vec::new()
            };
            Ok(StatusReport {
                running: false,
                pid: None,
                dir: config.dir.display().to_string(),
                socket: socket_path(&config.dir).display().to_string(),
                started_at: None,
                level: config.level,
                max_bytes: config.max_bytes,
                logs,
            })
        }
        Err(err) => Err(err).context("failed to query log monitor status"),
    }
}

fn print_table(report: StatusReport) {
    let state = match (report.pid, report.started_at.as_deref()) {
        (Some(pid), Some(started_at)) => format!(
            "{} (pid {pid}, up {})",
            "running".green().bold(),
            uptime(started_at)
        ),
        _ => "not running".bright_black().bold().to_string(),
    };
    println!("log monitor {state}");
    println!(
        "dir {} | level {} | rotate at {} bytes",
        report.dir, report.level, report.max_bytes
    );

    if report.logs.is_empty() {
        println!("No logs.");
        return;
    }

    let rows: Vec<LogTableRow> = report
        .logs
        .into_iter()
        .map(|log| LogTableRow {
            name: log.name,
            size: human_bytes(log.size),
            rotated: log.rotated_size.map_or_else(|| "-".to_string(), human_bytes),
            rotations: log.rotations,
            open: if log.open { "yes" } else { "no" }.to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn uptime(started_at: &str) -> String {
    let Ok(started) = DateTime::parse_from_rfc3339(started_at) else {
        return "unknown".to_string();
    };
    let seconds = Local::now()
        .signed_duration_since(started.with_timezone(&Local))
        .num_seconds()
        .max(0);
    match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}

fn human_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
