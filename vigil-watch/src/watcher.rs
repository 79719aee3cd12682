//! The watcher state machine and the event pump behind [`WatchStream`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use vigil_core::{DrainPolicy, EventKind, WatchEvent, WatchTarget, WatcherConfig};

use crate::debounce::Debouncer;
use crate::error::WatchError;
use crate::source::{select_source, ChangeSource, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Watching,
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherState::Idle => write!(f, "idle"),
            WatcherState::Watching => write!(f, "watching"),
            WatcherState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Cloneable trigger for shutting a watcher down from any task or thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Debug)]
struct StopInner {
    stopped: AtomicBool,
    tx: broadcast::Sender<()>,
}

impl StopHandle {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Request shutdown. Only the first call has an effect.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.inner.tx.send(());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.tx.subscribe()
    }
}

/// Receiving end of a watch session.
///
/// Yields events until the watcher stops or every target is gone, then `None`.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent>,
}

impl WatchStream {
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

/// Observes a set of targets and produces a [`WatchStream`].
///
/// `Idle -> Watching -> Stopped`. A watcher runs one session; `Stopped` is
/// terminal. `watch` must be called from within a tokio runtime.
pub struct Watcher {
    config: WatcherConfig,
    state: WatcherState,
    failures: Vec<WatchError>,
    stop: StopHandle,
    pump: Option<JoinHandle<()>>,
}

impl Watcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            state: WatcherState::Idle,
            failures: Vec::new(),
            stop: StopHandle::new(),
            pump: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        match self.state {
            WatcherState::Watching if self.stop.is_stopped() => WatcherState::Stopped,
            WatcherState::Watching if self.pump.as_ref().map_or(true, |h| h.is_finished()) => {
                WatcherState::Stopped
            }
            state => state,
        }
    }

    /// Targets that could not be registered by the last `watch`.
    pub fn failures(&self) -> &[WatchError] {
        &self.failures
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Watch `targets` with the source `config.mode` selects.
    pub fn watch(&mut self, targets: &[WatchTarget]) -> Result<WatchStream, WatchError> {
        let config = self.config.clone();
        self.watch_with_source(targets, move |tx| select_source(&config, tx))
    }

    /// Watch `targets` with a source built by `factory`.
    ///
    /// Targets the source rejects are skipped and kept in [`Watcher::failures`].
    pub fn watch_with_source<F>(
        &mut self,
        targets: &[WatchTarget],
        factory: F,
    ) -> Result<WatchStream, WatchError>
    where
        F: FnOnce(EventSender) -> Result<Box<dyn ChangeSource>, WatchError>,
    {
        if self.state != WatcherState::Idle {
            return Err(WatchError::InvalidState {
                operation: "watch",
                state: self.state,
            });
        }

        let capacity = self.config.queue_capacity.max(1);
        let (raw_tx, raw_rx) = mpsc::channel(capacity);
        let mut source = factory(raw_tx)?;

        self.failures.clear();
        let mut live = HashMap::new();
        for target in targets {
            match source.add(target) {
                Ok(()) => {
                    live.insert(target.path.clone(), target.clone());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping watch target");
                    self.failures.push(err);
                }
            }
        }
        if live.is_empty() {
            source.close();
            self.state = WatcherState::Stopped;
            return Err(WatchError::NoUsableTargets);
        }

        tracing::info!(
            source = %source.kind(),
            targets = live.len(),
            failed = self.failures.len(),
            debounce_ms = self.config.debounce_ms,
            "watching",
        );

        let (out_tx, out_rx) = mpsc::channel(capacity);
        let pump = Pump {
            source,
            targets: live,
            debouncer: Debouncer::new(self.config.debounce()),
            raw_rx,
            out_tx,
            shutdown_rx: self.stop.subscribe(),
            stop: self.stop.clone(),
            drain: self.config.drain,
            leftover: Vec::new(),
        };
        self.pump = Some(tokio::spawn(pump.run()));
        self.state = WatcherState::Watching;
        Ok(WatchStream { rx: out_rx })
    }

    /// Stop watching and wait until the source is released. Idempotent.
    pub async fn stop(&mut self) {
        self.stop.stop();
        if let Some(pump) = self.pump.take() {
            if let Err(err) = pump.await {
                tracing::error!(error = %err, "watch pump failed");
            }
        }
        self.state = WatcherState::Stopped;
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

struct Pump {
    source: Box<dyn ChangeSource>,
    targets: HashMap<PathBuf, WatchTarget>,
    debouncer: Debouncer,
    raw_rx: mpsc::Receiver<WatchEvent>,
    out_tx: mpsc::Sender<WatchEvent>,
    shutdown_rx: broadcast::Receiver<()>,
    stop: StopHandle,
    drain: DrainPolicy,
    /// Ready events that were not delivered when shutdown arrived.
    leftover: Vec<WatchEvent>,
}

enum Flow {
    Continue,
    Finish,
}

impl Pump {
    async fn run(mut self) {
        if !self.stop.is_stopped() {
            loop {
                // The source's callback thread may be blocked on a full queue.
                if self.raw_rx.is_empty() && matches!(self.rearm().await, Flow::Finish) {
                    break;
                }
                let deadline = self.debouncer.next_deadline();
                let flow = tokio::select! {
                    biased;
                    _ = self.shutdown_rx.recv() => Flow::Finish,
                    raw = self.raw_rx.recv() => match raw {
                        Some(event) => self.handle(event).await,
                        None => Flow::Finish,
                    },
                    _ = wait_until(deadline) => {
                        let ready = self.debouncer.expire(Instant::now());
                        self.emit(ready).await
                    }
                };
                if matches!(flow, Flow::Finish) {
                    break;
                }
            }
        }
        self.finish().await;
    }

    async fn handle(&mut self, event: WatchEvent) -> Flow {
        let Some(target) = self.targets.get(&event.target) else {
            return Flow::Continue;
        };

        if event.kind == EventKind::Gone {
            tracing::warn!(path = %event.target.display(), "watch target gone");
            self.targets.remove(&event.target);
            self.source.remove(&event.target);
            let ready = self.debouncer.push(event, Instant::now());
            if matches!(self.emit(ready).await, Flow::Finish) || self.targets.is_empty() {
                return Flow::Finish;
            }
            return Flow::Continue;
        }

        if !target.accepts(event.kind, event.renamed) {
            return Flow::Continue;
        }
        let ready = self.debouncer.push(event, Instant::now());
        self.emit(ready).await
    }

    async fn rearm(&mut self) -> Flow {
        for event in self.source.rearm() {
            if matches!(self.handle(event).await, Flow::Finish) {
                return Flow::Finish;
            }
        }
        Flow::Continue
    }

    /// Send `events` in order, waiting for queue space. A shutdown while
    /// waiting parks the remainder in `leftover`.
    async fn emit(&mut self, events: Vec<WatchEvent>) -> Flow {
        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    self.leftover.push(event);
                    self.leftover.extend(events);
                    return Flow::Finish;
                }
                sent = self.out_tx.send(event.clone()) => {
                    if sent.is_err() {
                        // Consumer dropped the stream.
                        return Flow::Finish;
                    }
                }
            }
        }
        Flow::Continue
    }

    async fn finish(self) {
        let Pump {
            mut source,
            raw_rx,
            out_tx,
            mut debouncer,
            drain,
            leftover,
            ..
        } = self;
        drop(raw_rx);

        let mut pending = leftover;
        pending.extend(debouncer.drain());
        let discarded = match drain {
            DrainPolicy::Deliver => pending
                .into_iter()
                .filter(|event| out_tx.try_send(event.clone()).is_err())
                .count(),
            DrainPolicy::Discard => pending.len(),
        };
        tracing::info!(discarded, drain = %drain, "watcher stopping");

        if let Err(err) = tokio::task::spawn_blocking(move || source.close()).await {
            tracing::error!(error = %err, "closing change source failed");
        }
        drop(out_tx);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
