//! YAML configuration for both resident helpers.
//!
//! # File layout
//!
//! ```yaml
//! logmonitor:
//!   dir: /data/adb/modules/vigil/logs
//!   max_bytes: 1048576
//!   level: info
//! watcher:
//!   debounce_ms: 100
//!   poll_interval_ms: 1000
//!   mode: auto
//!   targets:
//!     - path: /data/adb/modules/vigil/config.yaml
//!       events: [modify]
//! ```
//!
//! Both sections are optional. Unknown keys are rejected so that typos fail
//! loudly at startup. Executables merge command-line flags over the loaded
//! values and call `validate` afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{invalid, ConfigError};
use crate::types::{LogLevel, WatchTarget};

/// Environment variable overriding the default log directory.
pub const LOG_DIR_ENV: &str = "VIGIL_LOG_DIR";

pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
pub const MIN_MAX_BYTES: u64 = 64;
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const MIN_POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logmonitor: LogMonitorConfig,
    pub watcher: WatcherConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logmonitor.validate()?;
        self.watcher.validate()
    }
}

/// Load a configuration file.
///
/// Returns `ConfigError::Io` if the file cannot be read and
/// `ConfigError::Parse` (with path + line context) if it is malformed.
/// Values are not validated here.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `$VIGIL_LOG_DIR`, else `<data_local_dir>/vigil/logs`.
pub fn default_log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
        .join("logs")
}

// ---------------------------------------------------------------------------
// Log monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogMonitorConfig {
    /// Directory holding `<name>.log`, `<name>.log.old` and the control socket.
    pub dir: PathBuf,
    /// Rotation cap for each active log file.
    pub max_bytes: u64,
    /// Entries more verbose than this are dropped.
    pub level: LogLevel,
}

impl Default for LogMonitorConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            max_bytes: DEFAULT_MAX_BYTES,
            level: LogLevel::Info,
        }
    }
}

impl LogMonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dir.as_os_str().is_empty() {
            return Err(invalid("logmonitor.dir", "path is empty"));
        }
        if self.dir.exists() && !self.dir.is_dir() {
            return Err(invalid(
                "logmonitor.dir",
                format!("{} exists but is not a directory", self.dir.display()),
            ));
        }
        if self.max_bytes < MIN_MAX_BYTES {
            return Err(invalid(
                "logmonitor.max_bytes",
                format!("{} is below the minimum of {MIN_MAX_BYTES}", self.max_bytes),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// Which change source backs the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Native OS notification, polling if it cannot be initialised.
    #[default]
    Auto,
    Native,
    Poll,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Auto => write!(f, "auto"),
            SourceMode::Native => write!(f, "native"),
            SourceMode::Poll => write!(f, "poll"),
        }
    }
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SourceMode::Auto),
            "native" => Ok(SourceMode::Native),
            "poll" => Ok(SourceMode::Poll),
            other => Err(format!(
                "unknown source mode '{other}'; expected: auto, native, poll"
            )),
        }
    }
}

/// What happens to debounced events still pending when the watcher stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainPolicy {
    /// Push them into the queue if there is room; discard the rest.
    #[default]
    Deliver,
    Discard,
}

impl fmt::Display for DrainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainPolicy::Deliver => write!(f, "deliver"),
            DrainPolicy::Discard => write!(f, "discard"),
        }
    }
}

impl FromStr for DrainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deliver" => Ok(DrainPolicy::Deliver),
            "discard" => Ok(DrainPolicy::Discard),
            other => Err(format!(
                "unknown drain policy '{other}'; expected: deliver, discard"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// Coalescing window for repeated `modify` events; `0` disables it.
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub mode: SourceMode,
    pub drain: DrainPolicy,
    /// Capacity of the bounded event queues.
    pub queue_capacity: usize,
    pub targets: Vec<WatchTarget>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            mode: SourceMode::Auto,
            drain: DrainPolicy::Deliver,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            targets: Vec::new(),
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate tunables and every configured target.
    ///
    /// An empty target list is allowed here; see [`WatcherConfig::require_targets`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(invalid(
                "watcher.poll_interval_ms",
                format!(
                    "{} is below the minimum of {MIN_POLL_INTERVAL_MS}",
                    self.poll_interval_ms
                ),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("watcher.queue_capacity", "must be at least 1"));
        }
        for (index, target) in self.targets.iter().enumerate() {
            if target.path.as_os_str().is_empty() {
                return Err(invalid(format!("watcher.targets[{index}].path"), "path is empty"));
            }
            if target.events.is_empty() {
                return Err(invalid(
                    format!("watcher.targets[{index}].events"),
                    "at least one event kind is required",
                ));
            }
        }
        Ok(())
    }

    pub fn require_targets(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interest;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.logmonitor.max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(config.watcher.debounce(), Duration::from_millis(100));
        assert_eq!(config.watcher.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn target_defaults_fill_in() {
        let yaml = "watcher:\n  targets:\n    - path: /tmp/a\n";
        let config: Config = serde_yaml::from_str(yaml).expect("parse");
        let target = &config.watcher.targets[0];
        assert!(!target.recursive);
        assert_eq!(target.events.len(), Interest::ALL.len());
    }

    #[test]
    fn numeric_level_is_accepted() {
        let yaml = "logmonitor:\n  level: 4\n";
        let config: Config = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.logmonitor.level, LogLevel::Debug);
    }

    #[test]
    fn empty_event_list_is_rejected() {
        let mut config = WatcherConfig::default();
        config
            .targets
            .push(WatchTarget::new("/tmp/a").with_events([]));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("targets[0].events"), "got: {err}");
    }

    #[test]
    fn require_targets_reports_no_targets() {
        let err = WatcherConfig::default().require_targets().unwrap_err();
        assert!(matches!(err, ConfigError::NoTargets));
    }
}
