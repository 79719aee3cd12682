//! Change source backed by the OS notification facility (inotify, FSEvents).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::event::{ModifyKind, RenameMode};
use notify::{
    recommended_watcher, Event, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode,
    Watcher as _,
};

use vigil_core::{EventKind, WatchEvent, WatchTarget};

use crate::error::WatchError;
use crate::source::{ChangeSource, EventSender, SourceKind};

pub struct NativeSource {
    watcher: Option<RecommendedWatcher>,
    registered: Arc<Mutex<Vec<Registered>>>,
}

/// A target together with its canonical root. FSEvents reports real paths
/// (e.g. `/private/var/...`), so ownership is decided on the canonical form.
#[derive(Debug, Clone)]
struct Registered {
    target: WatchTarget,
    root: PathBuf,
    /// The root was replaced in place and the OS watch still points at the
    /// old inode until [`ChangeSource::rearm`] runs.
    stale: bool,
}

impl Registered {
    fn new(target: &WatchTarget, root: PathBuf) -> Self {
        Self {
            target: target.clone(),
            root,
            stale: false,
        }
    }

    fn mode(&self) -> RecursiveMode {
        if self.target.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }

    fn owns(&self, path: &Path) -> bool {
        if path == self.root {
            return true;
        }
        if self.target.recursive {
            path.starts_with(&self.root)
        } else {
            path.parent() == Some(self.root.as_path())
        }
    }

    /// Map an event path back under the target path as configured.
    fn rebase(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => self.target.path.clone(),
            Ok(rel) => self.target.path.join(rel),
            Err(_) => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Create,
    Modify,
    Delete,
    RenamedFrom,
    RenamedTo,
}

impl NativeSource {
    pub fn new(tx: EventSender) -> Result<Self, WatchError> {
        let registered = Arc::new(Mutex::new(Vec::<Registered>::new()));
        let shared = registered.clone();
        let watcher = recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "native watcher error");
                    return;
                }
            };
            // Translate under the lock, send after releasing it.
            let events = translate(&event, &mut lock(&shared));
            for event in events {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
        })
        .map_err(|err| WatchError::OsFacilityUnavailable(err.to_string()))?;

        Ok(Self {
            watcher: Some(watcher),
            registered,
        })
    }
}

impl ChangeSource for NativeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Native
    }

    fn add(&mut self, target: &WatchTarget) -> Result<(), WatchError> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Err(WatchError::target(&target.path, "source is closed"));
        };
        let root = fs::canonicalize(&target.path).map_err(|e| WatchError::target(&target.path, e))?;
        let entry = Registered::new(target, root);
        watcher
            .watch(&entry.root, entry.mode())
            .map_err(|e| WatchError::target(&target.path, e))?;
        tracing::debug!(path = %target.path.display(), root = %entry.root.display(), "watching");
        lock(&self.registered).push(entry);
        Ok(())
    }

    // The OS drops its own watch when a root disappears; only the mapping goes.
    fn remove(&mut self, path: &Path) {
        lock(&self.registered).retain(|entry| entry.target.path != path);
    }

    /// Point the OS watch of every replaced root at its new inode. A root
    /// that cannot be watched again is reported gone.
    fn rearm(&mut self) -> Vec<WatchEvent> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Vec::new();
        };
        let stale: Vec<Registered> = lock(&self.registered)
            .iter_mut()
            .filter(|entry| entry.stale)
            .map(|entry| {
                entry.stale = false;
                entry.clone()
            })
            .collect();

        let mut out = Vec::new();
        for entry in stale {
            // inotify already dropped the old descriptor; notify may not know yet.
            let _ = watcher.unwatch(&entry.root);
            let path = entry.target.path.clone();
            match watcher.watch(&entry.root, entry.mode()) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "re-armed replaced target");
                    // Covers writes that landed before the new watch existed.
                    out.push(WatchEvent::new(path.clone(), EventKind::Modify, path));
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot re-arm replaced target");
                    lock(&self.registered).retain(|e| e.target.path != path);
                    out.push(WatchEvent::new(path.clone(), EventKind::Gone, path));
                }
            }
        }
        out
    }

    fn close(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            lock(&self.registered).clear();
            drop(watcher);
            tracing::debug!("native source closed");
        }
    }
}

impl Drop for NativeSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(registered: &Mutex<Vec<Registered>>) -> MutexGuard<'_, Vec<Registered>> {
    registered.lock().unwrap_or_else(PoisonError::into_inner)
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn classify(kind: &NotifyKind, path: &Path) -> Option<Change> {
    match kind {
        NotifyKind::Create(_) => Some(Change::Create),
        NotifyKind::Remove(_) => Some(Change::Delete),
        NotifyKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => Some(Change::RenamedFrom),
            RenameMode::To => Some(Change::RenamedTo),
            // The From/To halves already produced the pair.
            RenameMode::Both => None,
            RenameMode::Any | RenameMode::Other => Some(if exists(path) {
                Change::RenamedTo
            } else {
                Change::RenamedFrom
            }),
        },
        NotifyKind::Modify(_) => Some(Change::Modify),
        NotifyKind::Access(_) | NotifyKind::Any | NotifyKind::Other => None,
    }
}

/// Turn one notify event into watch events, dropping targets that are gone.
fn translate(event: &Event, registered: &mut Vec<Registered>) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    for path in &event.paths {
        let Some(change) = classify(&event.kind, path) else {
            continue;
        };
        let Some(index) = owner(registered, path) else {
            continue;
        };

        let entry = &mut registered[index];
        if *path == entry.root && matches!(change, Change::Delete | Change::RenamedFrom) {
            if exists(&entry.root) {
                // Replaced in place, e.g. an editor saving through a rename.
                entry.stale = true;
                out.push(WatchEvent::new(
                    entry.target.path.clone(),
                    EventKind::Modify,
                    entry.target.path.clone(),
                ));
            } else {
                let gone = registered.remove(index);
                out.push(WatchEvent::new(
                    gone.target.path.clone(),
                    EventKind::Gone,
                    gone.target.path,
                ));
            }
            continue;
        }

        let target = entry.target.path.clone();
        let path = entry.rebase(path);
        let event = match change {
            Change::Create => WatchEvent::new(target, EventKind::Create, path),
            Change::Modify => WatchEvent::new(target, EventKind::Modify, path),
            Change::Delete => WatchEvent::new(target, EventKind::Delete, path),
            Change::RenamedFrom => WatchEvent::new(target, EventKind::Delete, path).rename_half(),
            Change::RenamedTo => WatchEvent::new(target, EventKind::Create, path).rename_half(),
        };
        out.push(event);
    }
    out
}

/// Index of the target with the longest root owning `path`.
fn owner(registered: &[Registered], path: &Path) -> Option<usize> {
    registered
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.owns(path))
        .max_by_key(|(_, entry)| entry.root.components().count())
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn registered(dir: &TempDir, recursive: bool) -> Registered {
        Registered::new(
            &WatchTarget::new(dir.path()).recursive(recursive),
            fs::canonicalize(dir.path()).unwrap(),
        )
    }

    fn event(kind: NotifyKind, path: PathBuf) -> Event {
        Event::new(kind).add_path(path)
    }

    #[test]
    fn child_events_are_rebased_onto_configured_path() {
        let dir = TempDir::new().unwrap();
        let mut targets = vec![registered(&dir, false)];
        let root = targets[0].root.clone();

        let out = translate(
            &event(NotifyKind::Create(CreateKind::File), root.join("a.txt")),
            &mut targets,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EventKind::Create);
        assert_eq!(out[0].path, dir.path().join("a.txt"));
        assert_eq!(out[0].target, dir.path());

        let out = translate(
            &event(
                NotifyKind::Modify(ModifyKind::Data(DataChange::Content)),
                root.join("a.txt"),
            ),
            &mut targets,
        );
        assert_eq!(out[0].kind, EventKind::Modify);
    }

    #[test]
    fn rename_halves_become_delete_then_create() {
        let dir = TempDir::new().unwrap();
        let mut targets = vec![registered(&dir, false)];
        let root = targets[0].root.clone();

        let from = translate(
            &event(NotifyKind::Modify(ModifyKind::Name(RenameMode::From)), root.join("old")),
            &mut targets,
        );
        let to = translate(
            &event(NotifyKind::Modify(ModifyKind::Name(RenameMode::To)), root.join("new")),
            &mut targets,
        );
        let both = translate(
            &Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(root.join("old"))
                .add_path(root.join("new")),
            &mut targets,
        );

        assert_eq!((from[0].kind, from[0].renamed), (EventKind::Delete, true));
        assert_eq!((to[0].kind, to[0].renamed), (EventKind::Create, true));
        assert!(both.is_empty());
    }

    #[test]
    fn ambiguous_rename_is_resolved_by_existence() {
        let dir = TempDir::new().unwrap();
        let mut targets = vec![registered(&dir, false)];
        let root = targets[0].root.clone();
        fs::write(root.join("present"), "x").unwrap();

        let rename_any = || NotifyKind::Modify(ModifyKind::Name(RenameMode::Any));
        let present = translate(&event(rename_any(), root.join("present")), &mut targets);
        let absent = translate(&event(rename_any(), root.join("absent")), &mut targets);
        assert_eq!(present[0].kind, EventKind::Create);
        assert_eq!(absent[0].kind, EventKind::Delete);
    }

    #[test]
    fn access_events_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut targets = vec![registered(&dir, false)];
        let root = targets[0].root.clone();
        let out = translate(
            &event(
                NotifyKind::Access(notify::event::AccessKind::Any),
                root.join("a"),
            ),
            &mut targets,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn non_recursive_target_ignores_grandchildren() {
        let dir = TempDir::new().unwrap();
        let mut targets = vec![registered(&dir, false)];
        let root = targets[0].root.clone();
        let out = translate(
            &event(NotifyKind::Create(CreateKind::File), root.join("sub/deep")),
            &mut targets,
        );
        assert!(out.is_empty());

        let mut recursive = vec![registered(&dir, true)];
        let out = translate(
            &event(NotifyKind::Create(CreateKind::File), root.join("sub/deep")),
            &mut recursive,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn longest_root_owns_the_event() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        let mut targets = vec![
            registered(&dir, true),
            Registered::new(&WatchTarget::new(&nested), fs::canonicalize(&nested).unwrap()),
        ];
        let root = targets[1].root.clone();
        let out = translate(
            &event(NotifyKind::Create(CreateKind::File), root.join("f")),
            &mut targets,
        );
        assert_eq!(out[0].target, nested);
    }

    #[test]
    fn removed_root_is_gone_once() {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("watched");
        fs::create_dir(&watched).unwrap();
        let root = fs::canonicalize(&watched).unwrap();
        let mut targets = vec![Registered::new(&WatchTarget::new(&watched), root.clone())];
        fs::remove_dir(&watched).unwrap();

        let removal = event(NotifyKind::Remove(RemoveKind::Folder), root);
        let out = translate(&removal, &mut targets);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EventKind::Gone);
        assert_eq!(out[0].path, watched);
        assert!(targets.is_empty());

        assert!(translate(&removal, &mut targets).is_empty());
    }

    #[test]
    fn replaced_root_file_reports_modify() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.yaml");
        fs::write(&file, "a").unwrap();
        let root = fs::canonicalize(&file).unwrap();
        let mut targets = vec![Registered::new(&WatchTarget::new(&file), root.clone())];

        let out = translate(
            &event(NotifyKind::Remove(RemoveKind::File), root),
            &mut targets,
        );
        assert_eq!(out[0].kind, EventKind::Modify);
        assert_eq!(targets.len(), 1);
        assert!(targets[0].stale);
    }

    #[test]
    fn rearm_watches_the_replacement_again() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let mut source = NativeSource::new(tx).unwrap();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.yaml");
        fs::write(&file, "a").unwrap();
        source.add(&WatchTarget::new(&file)).unwrap();

        assert!(source.rearm().is_empty());

        lock(&source.registered)[0].stale = true;
        let out = source.rearm();
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].kind, out[0].path.clone()), (EventKind::Modify, file));
        assert!(!lock(&source.registered)[0].stale);
    }

    #[test]
    fn rearm_of_vanished_root_reports_gone() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let mut source = NativeSource::new(tx).unwrap();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.yaml");
        fs::write(&file, "a").unwrap();
        source.add(&WatchTarget::new(&file)).unwrap();

        lock(&source.registered)[0].stale = true;
        fs::remove_file(&file).unwrap();
        let out = source.rearm();
        assert_eq!(out[0].kind, EventKind::Gone);
        assert!(lock(&source.registered).is_empty());
    }
}
