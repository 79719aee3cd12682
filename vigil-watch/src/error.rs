//! Error types for vigil-watch.

use std::path::PathBuf;

use thiserror::Error;

use crate::watcher::WatcherState;

/// All errors that can arise from watching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// A single target could not be registered. Other targets keep working.
    #[error("cannot watch {path}: {reason}")]
    TargetUnavailable { path: PathBuf, reason: String },

    /// The native notification facility could not be initialized.
    #[error("native file notification unavailable: {0}")]
    OsFacilityUnavailable(String),

    #[error("no watch target could be registered")]
    NoUsableTargets,

    #[error("cannot {operation} a watcher that is {state}")]
    InvalidState {
        operation: &'static str,
        state: WatcherState,
    },
}

impl WatchError {
    pub(crate) fn target(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        WatchError::TargetUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
