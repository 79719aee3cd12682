//! Per-path coalescing of `modify` bursts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use vigil_core::{EventKind, WatchEvent};

/// Fixed-window debouncer.
///
/// The first `modify` of a path opens a window; later `modify` events for the
/// same path inside it replace the pending one, and a single `modify` comes
/// out of [`Debouncer::expire`] when the window closes. Any other event on
/// the path releases the pending `modify` first so per-path order holds.
///
/// Windows are kept per `(target, path)`: overlapping targets that report
/// the same path coalesce independently.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<Key, Pending>,
    seq: u64,
}

type Key = (PathBuf, PathBuf);

fn key(event: &WatchEvent) -> Key {
    (event.target.clone(), event.path.clone())
}

#[derive(Debug)]
struct Pending {
    event: WatchEvent,
    deadline: Instant,
    seq: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            seq: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Feed one event. Returns the events that are ready now, in order.
    pub fn push(&mut self, event: WatchEvent, now: Instant) -> Vec<WatchEvent> {
        if self.window.is_zero() {
            return vec![event];
        }

        match event.kind {
            EventKind::Modify => {
                let slot = key(&event);
                if let Some(pending) = self.pending.get_mut(&slot) {
                    pending.event = event;
                } else {
                    self.seq += 1;
                    self.pending.insert(
                        slot,
                        Pending {
                            event,
                            deadline: now + self.window,
                            seq: self.seq,
                        },
                    );
                }
                Vec::new()
            }
            EventKind::Gone => {
                let mut ready = self.take_target(&event.target);
                ready.push(event);
                ready
            }
            EventKind::Create | EventKind::Delete => {
                let mut ready = Vec::with_capacity(2);
                if let Some(pending) = self.pending.remove(&key(&event)) {
                    ready.push(pending.event);
                }
                ready.push(event);
                ready
            }
        }
    }

    /// Remove and return every event whose window has closed by `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<WatchEvent> {
        self.take(|pending| pending.deadline <= now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Remove and return everything pending, oldest window first.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        let mut ready: Vec<Pending> = self.pending.drain().map(|(_, pending)| pending).collect();
        ready.sort_by_key(|pending| pending.seq);
        ready.into_iter().map(|pending| pending.event).collect()
    }

    fn take_target(&mut self, target: &Path) -> Vec<WatchEvent> {
        self.take(|pending| pending.event.target == target)
    }

    /// Remove the pending events matching `pred`, oldest window first.
    fn take(&mut self, pred: impl Fn(&Pending) -> bool) -> Vec<WatchEvent> {
        let keys: Vec<Key> = self
            .pending
            .iter()
            .filter(|(_, pending)| pred(pending))
            .map(|(key, _)| key.clone())
            .collect();
        let mut ready: Vec<Pending> = keys
            .iter()
            .filter_map(|key| self.pending.remove(key))
            .collect();
        ready.sort_by_key(|pending| pending.seq);
        ready.into_iter().map(|pending| pending.event).collect()
    }
}
