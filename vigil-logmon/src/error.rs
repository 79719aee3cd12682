use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the log sink, the monitor, and the control protocol.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("write to {path} failed: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rotation of {path} failed: {source}")]
    RotateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A batch stopped early. The first `written` entries are in the file.
    #[error("batch stopped after {written} of {total} entries: {source}")]
    BatchInterrupted {
        written: usize,
        total: usize,
        #[source]
        source: Box<LogError>,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log name '{0}'")]
    InvalidLogName(String),

    #[error("config error: {0}")]
    Config(#[from] vigil_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log monitor protocol error: {0}")]
    Protocol(String),

    #[error("log monitor is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LogError {
    LogError::Io {
        path: path.into(),
        source,
    }
}
