//! Vigil core library: domain types, line formats and configuration.
//!
//! - [`types`]: log levels and entries, watch targets and events
//! - [`config`]: YAML configuration for both helpers
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DrainPolicy, LogMonitorConfig, SourceMode, WatcherConfig};
pub use error::ConfigError;
pub use types::{
    parse_notification, EventKind, Interest, LogEntry, LogLevel, WatchEvent, WatchTarget,
    DEFAULT_TAG, MAX_MESSAGE_BYTES,
};
