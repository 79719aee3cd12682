//! # vigil-watch
//!
//! Filesystem change observation for a fixed set of targets.
//!
//! A [`ChangeSource`] (native notifications or stat polling) produces raw
//! events; the [`Watcher`] filters them by interest, coalesces `modify`
//! bursts with a [`Debouncer`] and hands them out through a bounded
//! [`WatchStream`].

pub mod debounce;
pub mod error;
pub mod native;
pub mod poll;
pub mod source;
pub mod watcher;

pub use debounce::Debouncer;
pub use error::WatchError;
pub use native::NativeSource;
pub use poll::PollSource;
pub use source::{select_source, ChangeSource, EventSender, SourceKind};
pub use watcher::{StopHandle, WatchStream, Watcher, WatcherState};
