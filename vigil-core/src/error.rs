//! Error types for vigil-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value was syntactically valid but out of range or inconsistent.
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The watcher was started without any target.
    #[error("no watch targets configured")]
    NoTargets,
}

pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}
