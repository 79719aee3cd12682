//! A directory of named logs sharing one cap and one level threshold.
//!
//! ```text
//! <dir>/
//!   main.log          daemon's own log
//!   main.log.old      previous generation
//!   <name>.log        one per producer name (`-n NAME`)
//!   logmonitor.sock   control socket while the daemon runs
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use vigil_core::{LogEntry, LogLevel, LogMonitorConfig};

use crate::error::{io_err, LogError};
use crate::paths::{is_log_file_name, log_path, rotated_path, LOG_EXTENSION};
use crate::sink::LogSink;
use crate::tail::Tail;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStatus {
    pub name: String,
    pub size: u64,
    /// Size of `<name>.log.old`, if present.
    pub rotated_size: Option<u64>,
    /// Rotations since this monitor opened the log.
    pub rotations: u64,
    pub open: bool,
}

#[derive(Debug)]
pub struct LogMonitor {
    dir: PathBuf,
    max_bytes: u64,
    level: LogLevel,
    sinks: Mutex<HashMap<String, Arc<LogSink>>>,
}

impl LogMonitor {
    /// Validate `config` and create the log directory.
    pub fn open(config: &LogMonitorConfig) -> Result<Self, LogError> {
        config.validate()?;
        fs::create_dir_all(&config.dir).map_err(|e| io_err(&config.dir, e))?;
        Ok(Self {
            dir: config.dir.clone(),
            max_bytes: config.max_bytes,
            level: config.level,
            sinks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Sink for `name`, opening it on first use.
    pub fn sink(&self, name: &str) -> Result<Arc<LogSink>, LogError> {
        validate_log_name(name)?;
        let mut sinks = self.lock();
        if let Some(sink) = sinks.get(name) {
            return Ok(sink.clone());
        }
        let sink = Arc::new(LogSink::open(log_path(&self.dir, name), self.max_bytes)?);
        sinks.insert(name.to_string(), sink.clone());
        Ok(sink)
    }

    /// Append to `name`. Returns `false` when the entry is below the threshold.
    pub fn append(&self, name: &str, entry: &LogEntry) -> Result<bool, LogError> {
        if !self.level.allows(entry.level) {
            return Ok(false);
        }
        self.sink(name)?.append(entry)?;
        Ok(true)
    }

    /// Append the entries that pass the threshold as one contiguous batch.
    /// Returns how many were written.
    pub fn append_batch(&self, name: &str, entries: &[LogEntry]) -> Result<usize, LogError> {
        let kept: Vec<LogEntry> = entries
            .iter()
            .filter(|entry| self.level.allows(entry.level))
            .cloned()
            .collect();
        if kept.is_empty() {
            return Ok(0);
        }
        self.sink(name)?.append_batch(&kept)
    }

    pub fn rotate(&self, name: &str) -> Result<(), LogError> {
        self.sink(name)?.rotate()
    }

    /// Read-only tail; does not open a sink.
    pub fn tail(&self, name: &str, limit: usize) -> Result<Tail, LogError> {
        validate_log_name(name)?;
        Ok(Tail::for_log(log_path(&self.dir, name), limit))
    }

    /// Flush every open log. All logs are attempted; the first error is returned.
    pub fn flush_all(&self) -> Result<(), LogError> {
        let mut first_err = None;
        for sink in self.open_sinks() {
            if let Err(err) = sink.flush() {
                tracing::warn!(path = %sink.path().display(), error = %err, "log flush failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Close every open handle and forget the sinks.
    pub fn close_all(&self) {
        let sinks: Vec<_> = self.lock().drain().map(|(_, sink)| sink).collect();
        for sink in sinks {
            sink.close();
        }
    }

    /// Every log present in the directory, sorted by name.
    pub fn status(&self) -> Result<Vec<LogStatus>, LogError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(&format!(".{LOG_EXTENSION}")) {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let sinks = self.lock().clone();
        let mut report = Vec::with_capacity(names.len());
        for name in names {
            let active = log_path(&self.dir, &name);
            let rotated_size = fs::metadata(rotated_path(&active)).ok().map(|m| m.len());
            let status = match sinks.get(&name) {
                Some(sink) => {
                    let stats = sink.stats();
                    LogStatus {
                        name,
                        size: stats.size,
                        rotated_size,
                        rotations: stats.rotations,
                        open: true,
                    }
                }
                None => LogStatus {
                    size: fs::metadata(&active).map(|m| m.len()).unwrap_or(0),
                    name,
                    rotated_size,
                    rotations: 0,
                    open: false,
                },
            };
            report.push(status);
        }
        Ok(report)
    }

    /// Delete every `*.log` and `*.log.old` in the directory.
    ///
    /// Open handles are closed first. Returns the number of files removed.
    pub fn clean(&self) -> Result<usize, LogError> {
        self.close_all();
        let entries = fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let mut removed = 0usize;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let is_log = entry
                .file_name()
                .to_str()
                .map(is_log_file_name)
                .unwrap_or(false);
            if !is_log {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot delete log file");
                }
            }
        }
        tracing::info!(dir = %self.dir.display(), removed, "log directory cleaned");
        Ok(removed)
    }

    fn open_sinks(&self) -> Vec<Arc<LogSink>> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<LogSink>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Log names become file names: non-empty, no separators, not `.`/`..`.
pub fn validate_log_name(name: &str) -> Result<(), LogError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.chars().any(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(LogError::InvalidLogName(name.to_string()))
    }
}
