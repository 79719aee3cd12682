//! Change sources: where raw filesystem events come from.

use std::fmt;
use std::path::Path;

use tokio::sync::mpsc;

use vigil_core::{SourceMode, WatchEvent, WatchTarget, WatcherConfig};

use crate::error::WatchError;
use crate::native::NativeSource;
use crate::poll::PollSource;

/// Channel a source pushes raw events into. Sources call `blocking_send`
/// from their own threads.
pub type EventSender = mpsc::Sender<WatchEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Native,
    Poll,
    /// Supplied by the embedder through `Watcher::watch_with_source`.
    External,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Native => write!(f, "native"),
            SourceKind::Poll => write!(f, "poll"),
            SourceKind::External => write!(f, "external"),
        }
    }
}

/// A producer of raw [`WatchEvent`]s for a set of targets.
///
/// Events carry the target path as configured. A source reports the removal
/// of a target root as a single `gone` event and stops reporting that target.
pub trait ChangeSource: Send {
    fn kind(&self) -> SourceKind;

    /// Start observing `target`. Fails with [`WatchError::TargetUnavailable`].
    fn add(&mut self, target: &WatchTarget) -> Result<(), WatchError>;

    /// Stop observing the target registered under `path`. Unknown paths are ignored.
    fn remove(&mut self, path: &Path);

    /// Re-register targets whose root was replaced since the last call and
    /// return the events that produced. Called from the pump while no raw
    /// events are queued.
    fn rearm(&mut self) -> Vec<WatchEvent> {
        Vec::new()
    }

    /// Release OS handles and threads. Idempotent.
    fn close(&mut self);
}

/// Build the source `config.mode` asks for.
///
/// `auto` prefers the native facility and falls back to polling with one warning.
pub fn select_source(
    config: &WatcherConfig,
    tx: EventSender,
) -> Result<Box<dyn ChangeSource>, WatchError> {
    match config.mode {
        SourceMode::Poll => Ok(Box::new(PollSource::new(tx, config.poll_interval()))),
        SourceMode::Native => Ok(Box::new(NativeSource::new(tx)?)),
        SourceMode::Auto => match NativeSource::new(tx.clone()) {
            Ok(source) => Ok(Box::new(source)),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    interval_ms = config.poll_interval_ms,
                    "falling back to polling",
                );
                Ok(Box::new(PollSource::new(tx, config.poll_interval())))
            }
        },
    }
}
