//! Config loading error messages, validation and parameterised parsing.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use std::path::PathBuf;

use vigil_core::{
    config::{self, MIN_MAX_BYTES},
    ConfigError, DrainPolicy, Interest, LogLevel, SourceMode,
};

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_file_returns_io_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("vigil.yaml");
    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains("vigil.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("vigil.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("vigil.yaml"), "must contain file path, got: {msg}");
}

#[test]
fn load_rejects_unknown_keys() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("vigil.yaml");
    file.write_str("watcher:\n  debounce: 100\n").expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn load_empty_file_yields_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("vigil.yaml");
    file.write_str("\n").expect("write");

    let loaded = config::load_at(file.path()).expect("load");
    assert_eq!(loaded.watcher.mode, SourceMode::Auto);
    assert_eq!(loaded.watcher.drain, DrainPolicy::Deliver);
}

// ---------------------------------------------------------------------------
// 2. Full document
// ---------------------------------------------------------------------------

#[test]
fn load_full_document() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let logs = dir.child("logs");
    logs.create_dir_all().expect("mkdir");
    let file = dir.child("vigil.yaml");
    file.write_str(&format!(
        "logmonitor:\n  dir: {}\n  max_bytes: 2048\n  level: debug\n\
         watcher:\n  debounce_ms: 50\n  poll_interval_ms: 250\n  mode: poll\n  drain: discard\n  \
         targets:\n    - path: /etc/hosts\n      events: [modify, move]\n    - path: /var/lib\n      recursive: true\n",
        logs.path().display()
    ))
    .expect("write");

    let loaded = config::load_at(file.path()).expect("load");
    loaded.validate().expect("valid");

    assert_eq!(loaded.logmonitor.dir, logs.path());
    assert_eq!(loaded.logmonitor.max_bytes, 2048);
    assert_eq!(loaded.logmonitor.level, LogLevel::Debug);
    assert_eq!(loaded.watcher.debounce_ms, 50);
    assert_eq!(loaded.watcher.mode, SourceMode::Poll);
    assert_eq!(loaded.watcher.drain, DrainPolicy::Discard);
    assert_eq!(loaded.watcher.targets.len(), 2);
    assert_eq!(loaded.watcher.targets[0].path, PathBuf::from("/etc/hosts"));
    assert!(loaded.watcher.targets[0].events.contains(&Interest::Rename));
    assert!(!loaded.watcher.targets[0].events.contains(&Interest::Create));
    assert!(loaded.watcher.targets[1].recursive);
}

// ---------------------------------------------------------------------------
// 3. Validation
// ---------------------------------------------------------------------------

#[test]
fn max_bytes_below_minimum_is_rejected() {
    let mut loaded = vigil_core::Config::default();
    loaded.logmonitor.max_bytes = MIN_MAX_BYTES - 1;
    let err = loaded.validate().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "got: {err}");
    assert!(err.to_string().contains("logmonitor.max_bytes"));
}

#[test]
fn log_dir_that_is_a_file_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("not-a-dir");
    file.touch().expect("touch");
    file.assert(predicate::path::is_file());

    let mut loaded = vigil_core::Config::default();
    loaded.logmonitor.dir = file.path().to_path_buf();
    let err = loaded.validate().unwrap_err();
    assert!(err.to_string().contains("not a directory"), "got: {err}");
}

#[test]
fn poll_interval_below_minimum_is_rejected() {
    let mut loaded = vigil_core::Config::default();
    loaded.watcher.poll_interval_ms = 1;
    let err = loaded.validate().unwrap_err();
    assert!(err.to_string().contains("poll_interval_ms"), "got: {err}");
}

// ---------------------------------------------------------------------------
// 4. Parameterised level and mode parsing
// ---------------------------------------------------------------------------

#[rstest]
#[case("1", LogLevel::Error)]
#[case("error", LogLevel::Error)]
#[case("2", LogLevel::Warn)]
#[case("WARNING", LogLevel::Warn)]
#[case("3", LogLevel::Info)]
#[case(" Info ", LogLevel::Info)]
#[case("4", LogLevel::Debug)]
#[case("debug", LogLevel::Debug)]
fn level_parses(#[case] input: &str, #[case] expected: LogLevel) {
    assert_eq!(input.parse::<LogLevel>().expect("parse"), expected);
}

#[rstest]
#[case("0")]
#[case("5")]
#[case("verbose")]
#[case("")]
fn level_rejects(#[case] input: &str) {
    assert!(input.parse::<LogLevel>().is_err(), "{input:?} should not parse");
}

#[rstest]
#[case("auto", SourceMode::Auto)]
#[case("Native", SourceMode::Native)]
#[case("poll", SourceMode::Poll)]
fn source_mode_parses(#[case] input: &str, #[case] expected: SourceMode) {
    assert_eq!(input.parse::<SourceMode>().expect("parse"), expected);
}
