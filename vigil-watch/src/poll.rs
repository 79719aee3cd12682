//! Change source that stat-walks every target on a fixed interval.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, Metadata};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use vigil_core::{EventKind, WatchEvent, WatchTarget};

use crate::error::WatchError;
use crate::source::{ChangeSource, EventSender, SourceKind};

pub struct PollSource {
    targets: Arc<Mutex<Vec<Polled>>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

struct Polled {
    target: WatchTarget,
    snapshot: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    is_dir: bool,
}

impl From<&Metadata> for FileStamp {
    fn from(meta: &Metadata) -> Self {
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            is_dir: meta.is_dir(),
        }
    }
}

/// Every path under a target root (the root included) with its stamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Snapshot {
    entries: BTreeMap<PathBuf, FileStamp>,
}

impl Snapshot {
    /// `None` when the root itself no longer exists.
    pub(crate) fn capture(root: &Path, recursive: bool) -> Option<Snapshot> {
        let meta = fs::symlink_metadata(root).ok()?;
        let mut entries = BTreeMap::new();
        entries.insert(root.to_path_buf(), FileStamp::from(&meta));
        if !meta.is_dir() {
            return Some(Snapshot { entries });
        }

        let mut dirs = vec![root.to_path_buf()];
        let mut cursor = 0;
        while cursor < dirs.len() {
            let current = dirs[cursor].clone();
            cursor += 1;
            let Ok(listing) = fs::read_dir(&current) else {
                continue;
            };
            for entry in listing.flatten() {
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                let path = entry.path();
                if recursive && meta.is_dir() {
                    dirs.push(path.clone());
                }
                entries.insert(path, FileStamp::from(&meta));
            }
        }
        Some(Snapshot { entries })
    }

    /// Changes from `self` to `next`: deletions, then creations, then
    /// modifications, each in path order. Directory timestamp changes are
    /// not reported.
    ///
    /// A path that vanished and a new path carrying the identical stamp are
    /// taken as the two halves of a rename.
    pub(crate) fn diff(&self, next: &Snapshot, target: &Path) -> Vec<WatchEvent> {
        let mut deleted = Vec::new();
        let mut created = Vec::new();
        let mut modified = Vec::new();

        for (path, old) in &self.entries {
            match next.entries.get(path) {
                None => deleted.push(path),
                Some(new) if new.is_dir != old.is_dir => {
                    deleted.push(path);
                    created.push(path);
                }
                Some(new) if !new.is_dir && new != old => modified.push(path),
                Some(_) => {}
            }
        }
        for path in next.entries.keys() {
            if !self.entries.contains_key(path) {
                created.push(path);
            }
        }
        created.sort();

        let mut renamed = BTreeSet::new();
        for &from in &deleted {
            let Some(stamp) = self.entries.get(from) else {
                continue;
            };
            if next.entries.contains_key(from) {
                continue;
            }
            let to = created.iter().copied().find(|to| {
                !renamed.contains(to)
                    && !self.entries.contains_key(*to)
                    && next.entries.get(*to) == Some(stamp)
            });
            if let Some(to) = to {
                renamed.insert(from);
                renamed.insert(to);
            }
        }

        let event = |kind, path: &PathBuf| {
            let event = WatchEvent::new(target, kind, path.clone());
            if renamed.contains(path) {
                event.rename_half()
            } else {
                event
            }
        };
        deleted
            .into_iter()
            .map(|path| event(EventKind::Delete, path))
            .chain(created.into_iter().map(|path| event(EventKind::Create, path)))
            .chain(modified.into_iter().map(|path| event(EventKind::Modify, path)))
            .collect()
    }
}

impl PollSource {
    /// Start the polling thread. Targets are scanned every `interval`.
    pub fn new(tx: EventSender, interval: Duration) -> Self {
        let targets = Arc::new(Mutex::new(Vec::<Polled>::new()));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let shared = targets.clone();
        let thread = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            let events = scan(&mut lock(&shared));
            for event in events {
                if tx.blocking_send(event).is_err() {
                    return;
                }
            }
        });
        Self {
            targets,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// One polling pass over every target. Targets whose root vanished yield
/// `gone` and are dropped.
fn scan(targets: &mut Vec<Polled>) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    targets.retain_mut(|polled| {
        let path = &polled.target.path;
        match Snapshot::capture(path, polled.target.recursive) {
            Some(next) => {
                out.extend(polled.snapshot.diff(&next, path));
                polled.snapshot = next;
                true
            }
            None => {
                out.push(WatchEvent::new(path, EventKind::Gone, path));
                false
            }
        }
    });
    out
}

impl ChangeSource for PollSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Poll
    }

    fn add(&mut self, target: &WatchTarget) -> Result<(), WatchError> {
        if self.stop_tx.is_none() {
            return Err(WatchError::target(&target.path, "source is closed"));
        }
        if let Err(err) = fs::symlink_metadata(&target.path) {
            let reason = if err.kind() == ErrorKind::NotFound {
                "no such file or directory".to_string()
            } else {
                err.to_string()
            };
            return Err(WatchError::target(&target.path, reason));
        }
        let snapshot = Snapshot::capture(&target.path, target.recursive)
            .ok_or_else(|| WatchError::target(&target.path, "disappeared during registration"))?;
        tracing::debug!(
            path = %target.path.display(),
            entries = snapshot.entries.len(),
            "polling",
        );
        lock(&self.targets).push(Polled {
            target: target.clone(),
            snapshot,
        });
        Ok(())
    }

    fn remove(&mut self, path: &Path) {
        lock(&self.targets).retain(|polled| polled.target.path != path);
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("poll thread panicked");
            }
            tracing::debug!("poll source closed");
        }
    }
}

impl Drop for PollSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(targets: &Mutex<Vec<Polled>>) -> MutexGuard<'_, Vec<Polled>> {
    targets.lock().unwrap_or_else(PoisonError::into_inner)
}
