//! Size-capped, single-writer log file with one rotated generation.
//!
//! Rotation sequence, run under the sink lock before a line that would push
//! the active file past `max_bytes`:
//!   `<name>.log` → `<name>.log.old` (replacing any previous `.old`)
//!   Open a fresh empty `<name>.log`.
//!
//! The line that triggered rotation is the first line of the new file, so no
//! entry is split across or duplicated in both files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use vigil_core::LogEntry;

use crate::error::{io_err, LogError};
use crate::paths::rotated_path;
use crate::tail::Tail;

/// Point-in-time view of a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFileStats {
    pub path: PathBuf,
    /// Bytes in the active file.
    pub size: u64,
    /// Rotations performed by this sink since it was opened.
    pub rotations: u64,
}

/// Append-only sink for one active log file.
///
/// All mutation goes through one mutex, so concurrent producers never
/// interleave within a line and never write to a file that is mid-rename.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    old_path: PathBuf,
    max_bytes: u64,
    state: Mutex<SinkState>,
}

#[derive(Debug, Default)]
struct SinkState {
    file: Option<File>,
    size: u64,
    rotations: u64,
}

impl LogSink {
    /// Open (or create) `path` for appending. The parent directory is created
    /// if missing and the current size is taken from the existing file.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let sink = Self {
            old_path: rotated_path(&path),
            path,
            max_bytes,
            state: Mutex::new(SinkState::default()),
        };
        {
            let mut state = sink.lock();
            sink.ensure_open(&mut state)
                .map_err(|e| io_err(&sink.path, e))?;
        }
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rotated_path(&self) -> &Path {
        &self.old_path
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Append one entry as a single line.
    ///
    /// # Errors
    /// `LogError::RotateFailed` if the rotation this line required failed (the
    /// entry is not written); `LogError::WriteFailed` if the write itself
    /// failed. In both cases the handle is dropped and the next call reopens
    /// the file, so a transient failure does not disable the sink.
    pub fn append(&self, entry: &LogEntry) -> Result<(), LogError> {
        let line = entry.to_line();
        let mut state = self.lock();
        self.append_locked(&mut state, &line)
    }

    /// Append a batch under one lock acquisition so its lines stay contiguous.
    ///
    /// Rotation may still happen between two lines of the batch. Stops at the
    /// first failure with [`LogError::BatchInterrupted`]; the lines written
    /// before it stay in the file.
    pub fn append_batch(&self, entries: &[LogEntry]) -> Result<usize, LogError> {
        let mut state = self.lock();
        for (written, entry) in entries.iter().enumerate() {
            if let Err(err) = self.append_locked(&mut state, &entry.to_line()) {
                return Err(LogError::BatchInterrupted {
                    written,
                    total: entries.len(),
                    source: Box::new(err),
                });
            }
        }
        Ok(entries.len())
    }

    /// Rotate now, regardless of the current size.
    pub fn rotate(&self) -> Result<(), LogError> {
        let mut state = self.lock();
        self.rotate_locked(&mut state)
    }

    /// Flush the active file to stable storage.
    pub fn flush(&self) -> Result<(), LogError> {
        let mut state = self.lock();
        if let Some(file) = state.file.as_mut() {
            file.flush()
                .and_then(|()| file.sync_data())
                .map_err(|e| io_err(&self.path, e))?;
        }
        Ok(())
    }

    /// Release the file handle. A later append reopens it.
    pub fn close(&self) {
        let mut state = self.lock();
        if let Some(file) = state.file.take() {
            let _ = file.sync_data();
        }
    }

    pub fn stats(&self) -> LogFileStats {
        let state = self.lock();
        LogFileStats {
            path: self.path.clone(),
            size: state.size,
            rotations: state.rotations,
        }
    }

    /// Last `limit` entries of this log, reading into `.old` when needed.
    pub fn tail(&self, limit: usize) -> Tail {
        Tail::new(self.path.clone(), self.old_path.clone(), limit)
    }

    fn append_locked(&self, state: &mut SinkState, line: &str) -> Result<(), LogError> {
        let len = line.len() as u64;

        // Seed the size from disk after a failure closed the handle.
        if state.file.is_none() {
            self.ensure_open(state).map_err(|source| LogError::WriteFailed {
                path: self.path.clone(),
                source,
            })?;
        }

        if state.size > 0 && state.size + len > self.max_bytes {
            self.rotate_locked(state)?;
        }

        let written = self
            .ensure_open(state)
            .and_then(|file| file.write_all(line.as_bytes()));
        match written {
            Ok(()) => {
                state.size += len;
                Ok(())
            }
            Err(source) => {
                state.file = None;
                tracing::error!(path = %self.path.display(), error = %source, "log write failed");
                Err(LogError::WriteFailed {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    fn rotate_locked(&self, state: &mut SinkState) -> Result<(), LogError> {
        let rotate_failed = |source: io::Error| LogError::RotateFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(file) = state.file.take() {
            let _ = file.sync_data();
        }

        if let Err(err) = fs::rename(&self.path, &self.old_path) {
            match err.kind() {
                // Active file vanished underneath us; nothing to preserve.
                ErrorKind::NotFound => {}
                // Platforms where rename does not replace an existing target.
                _ if self.old_path.exists() => {
                    fs::remove_file(&self.old_path).map_err(rotate_failed)?;
                    fs::rename(&self.path, &self.old_path).map_err(rotate_failed)?;
                }
                _ => return Err(rotate_failed(err)),
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(rotate_failed)?;
        state.file = Some(file);
        state.size = 0;
        state.rotations += 1;

        tracing::info!(
            path = %self.path.display(),
            rotations = state.rotations,
            "log file rotated"
        );
        Ok(())
    }

    fn ensure_open<'a>(&self, state: &'a mut SinkState) -> io::Result<&'a mut File> {
        let file = match state.file.take() {
            Some(file) => file,
            None => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                state.size = file.metadata()?.len();
                file
            }
        };
        Ok(state.file.insert(file))
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
