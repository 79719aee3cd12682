//! Domain types shared by the log monitor and the file watcher.
//!
//! Both on-disk formats live here so that producers and readers agree:
//!
//! ```text
//! 2026-10-16 09:12:44.031 [INFO] service: zram configured        (log line)
//! 2026-10-16T09:12:44.031Z modify /data/adb/modules/vigil/conf   (notification line)
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout of a log line (local time, millisecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Upper bound on the UTF-8 length of a log message.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Upper bound on the length of a source tag.
pub const MAX_TAG_BYTES: usize = 64;

/// Tag used when a producer does not name itself.
pub const DEFAULT_TAG: &str = "main";

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

/// Severity of a log entry.
///
/// Declaration order is verbosity order, so `ERROR < WARN < INFO < DEBUG`.
/// The numeric form (`1..=4`) is accepted wherever a level is parsed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "LevelRepr", into = "String")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Numeric verbosity, `1` (errors only) through `4` (debug).
    pub fn verbosity(self) -> u8 {
        match self {
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
        }
    }

    pub fn from_verbosity(value: u8) -> Option<Self> {
        match value {
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Info),
            4 => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// True when an entry at `level` passes a threshold of `self`.
    pub fn allows(self, level: LogLevel) -> bool {
        level <= self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<u8>() {
            return LogLevel::from_verbosity(value)
                .ok_or_else(|| format!("log level out of range: {value} (expected 1-4)"));
        }
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!(
                "unknown log level '{other}'; expected: error, warn, info, debug or 1-4"
            )),
        }
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Number(u8),
    Name(String),
}

impl TryFrom<LevelRepr> for LogLevel {
    type Error = String;

    fn try_from(repr: LevelRepr) -> Result<Self, String> {
        match repr {
            LevelRepr::Number(value) => LogLevel::from_verbosity(value)
                .ok_or_else(|| format!("log level out of range: {value} (expected 1-4)")),
            LevelRepr::Name(name) => name.parse(),
        }
    }
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

/// One record of the log stream.
///
/// Construct with [`LogEntry::new`]; the tag and message are normalised so
/// that an entry always serialises to exactly one line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    /// Monotonic capture time. `None` for entries parsed back from disk.
    pub monotonic: Option<Instant>,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, tag: impl AsRef<str>, message: impl AsRef<str>) -> Self {
        Self::at(Local::now(), level, tag, message)
    }

    /// Build an entry with an explicit wall-clock timestamp.
    pub fn at(
        timestamp: DateTime<Local>,
        level: LogLevel,
        tag: impl AsRef<str>,
        message: impl AsRef<str>,
    ) -> Self {
        Self {
            timestamp,
            monotonic: Some(Instant::now()),
            level,
            tag: sanitize_tag(tag.as_ref()),
            message: sanitize_message(message.as_ref()),
        }
    }

    /// `TIMESTAMP [LEVEL] TAG: MESSAGE\n`
    pub fn to_line(&self) -> String {
        format!(
            "{} [{}] {}: {}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level,
            self.tag,
            self.message
        )
    }

    /// Byte length of [`LogEntry::to_line`].
    pub fn line_len(&self) -> usize {
        self.to_line().len()
    }

    /// Parse one line produced by [`LogEntry::to_line`].
    ///
    /// Returns `None` for anything that does not follow the format; readers
    /// skip such lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (timestamp, rest) = line.split_once(" [")?;
        let (level, rest) = rest.split_once("] ")?;
        let (tag, message) = match rest.split_once(": ") {
            Some(parts) => parts,
            None => (rest.strip_suffix(':')?, ""),
        };
        if tag.is_empty() {
            return None;
        }

        let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        let timestamp = Local.from_local_datetime(&naive).earliest()?;
        let level = LogLevel::from_str(level).ok()?;

        Some(Self {
            timestamp,
            monotonic: None,
            level,
            tag: tag.to_string(),
            message: message.to_string(),
        })
    }
}

fn sanitize_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.is_empty() {
        return DEFAULT_TAG.to_string();
    }
    let mut out: String = tag
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, ':' | '[' | ']') {
                '_'
            } else {
                c
            }
        })
        .collect();
    truncate_on_char_boundary(&mut out, MAX_TAG_BYTES);
    out
}

fn sanitize_message(message: &str) -> String {
    let mut out = message.replace(['\r', '\n'], " ");
    truncate_on_char_boundary(&mut out, MAX_MESSAGE_BYTES);
    out
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

// ---------------------------------------------------------------------------
// Watch targets
// ---------------------------------------------------------------------------

/// Event kinds a watch target can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interest {
    Create,
    Modify,
    Delete,
    #[serde(alias = "move")]
    Rename,
}

impl Interest {
    pub const ALL: [Interest; 4] = [
        Interest::Create,
        Interest::Modify,
        Interest::Delete,
        Interest::Rename,
    ];

    /// Parse a comma-separated list such as `modify,create`.
    pub fn parse_list(list: &str) -> Result<BTreeSet<Interest>, String> {
        let set = list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Interest::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;
        if set.is_empty() {
            return Err("event list is empty".to_string());
        }
        Ok(set)
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interest::Create => write!(f, "create"),
            Interest::Modify => write!(f, "modify"),
            Interest::Delete => write!(f, "delete"),
            Interest::Rename => write!(f, "rename"),
        }
    }
}

impl FromStr for Interest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Interest::Create),
            "modify" => Ok(Interest::Modify),
            "delete" => Ok(Interest::Delete),
            "rename" | "move" => Ok(Interest::Rename),
            other => Err(format!(
                "unknown event '{other}'; expected: create, modify, delete, rename"
            )),
        }
    }
}

fn all_interests() -> BTreeSet<Interest> {
    Interest::ALL.into_iter().collect()
}

/// A path registered for change observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchTarget {
    pub path: PathBuf,
    #[serde(default = "all_interests")]
    pub events: BTreeSet<Interest>,
    #[serde(default)]
    pub recursive: bool,
}

impl WatchTarget {
    /// Target interested in every event kind, non-recursive.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            events: all_interests(),
            recursive: false,
        }
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = Interest>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Whether an event of `kind` should be delivered for this target.
    ///
    /// Rename halves pass on the `rename` interest as well as on their own
    /// kind. `gone` is terminal and always passes.
    pub fn accepts(&self, kind: EventKind, renamed: bool) -> bool {
        let renamed = renamed && self.events.contains(&Interest::Rename);
        match kind {
            EventKind::Create => renamed || self.events.contains(&Interest::Create),
            EventKind::Delete => renamed || self.events.contains(&Interest::Delete),
            EventKind::Modify => self.events.contains(&Interest::Modify),
            EventKind::Gone => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Watch events
// ---------------------------------------------------------------------------

/// Kind of an emitted change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Modify,
    Delete,
    /// The watch target itself disappeared; no further events follow for it.
    Gone,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Create => write!(f, "create"),
            EventKind::Modify => write!(f, "modify"),
            EventKind::Delete => write!(f, "delete"),
            EventKind::Gone => write!(f, "gone"),
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(EventKind::Create),
            "modify" => Ok(EventKind::Modify),
            "delete" => Ok(EventKind::Delete),
            "gone" => Ok(EventKind::Gone),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// A change notification produced by the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Target path exactly as configured.
    pub target: PathBuf,
    pub kind: EventKind,
    /// Path the change happened to (the target itself or a child).
    pub path: PathBuf,
    pub at: DateTime<Utc>,
    /// Set on both halves of a rename (`delete` old, `create` new).
    #[serde(default)]
    pub renamed: bool,
}

impl WatchEvent {
    pub fn new(target: impl Into<PathBuf>, kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            kind,
            path: path.into(),
            at: Utc::now(),
            renamed: false,
        }
    }

    pub fn rename_half(mut self) -> Self {
        self.renamed = true;
        self
    }

    /// `<timestamp> <kind> <path>` without the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.kind,
            self.path.display()
        )
    }
}

/// Parse a notification line back into `(timestamp, kind, path)`.
///
/// The path is the remainder of the line and may contain spaces.
pub fn parse_notification(line: &str) -> Option<(DateTime<Utc>, EventKind, PathBuf)> {
    let line = line.trim_end_matches(['\n', '\r']);
    let (timestamp, rest) = line.split_once(' ')?;
    let (kind, path) = rest.split_once(' ')?;
    let at = DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc);
    let kind = EventKind::from_str(kind).ok()?;
    if path.is_empty() {
        return None;
    }
    Some((at, kind, PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_order_is_verbosity_order() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Info.allows(LogLevel::Warn));
        assert!(!LogLevel::Info.allows(LogLevel::Debug));
    }

    #[test]
    fn level_deserializes_from_number_or_name() {
        let levels: Vec<LogLevel> = serde_yaml::from_str("[1, warn, 3, DEBUG]").unwrap();
        assert_eq!(
            levels,
            [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug]
        );

        let err = serde_yaml::from_str::<LogLevel>("9").unwrap_err();
        assert!(err.to_string().contains("out of range"), "got: {err}");
    }

    #[test]
    fn entry_line_has_bracketed_level_and_tag() {
        let ts = Local.with_ymd_and_hms(2026, 3, 1, 8, 30, 5).unwrap();
        let entry = LogEntry::at(ts, LogLevel::Warn, "service", "swap low");
        assert_eq!(
            entry.to_line(),
            "2026-03-01 08:30:05.000 [WARN] service: swap low\n"
        );
    }

    #[test]
    fn entry_message_is_single_line_and_bounded() {
        let long = "é".repeat(MAX_MESSAGE_BYTES);
        let entry = LogEntry::new(LogLevel::Info, "t", format!("a\nb\r\n{long}"));
        assert!(!entry.message.contains('\n'));
        assert!(entry.message.len() <= MAX_MESSAGE_BYTES);
        assert!(entry.message.starts_with("a b  "));
        assert_eq!(entry.to_line().matches('\n').count(), 1);
    }

    #[test]
    fn tag_is_sanitized() {
        assert_eq!(LogEntry::new(LogLevel::Info, "", "m").tag, DEFAULT_TAG);
        assert_eq!(LogEntry::new(LogLevel::Info, "a b:c", "m").tag, "a_b_c");
    }

    #[test]
    fn parse_line_reads_back_written_entry() {
        let entry = LogEntry::new(LogLevel::Error, "watcher", "target: gone [x]");
        let parsed = LogEntry::parse_line(&entry.to_line()).expect("parse");
        assert_eq!(parsed.level, LogLevel::Error);
        assert_eq!(parsed.tag, "watcher");
        assert_eq!(parsed.message, "target: gone [x]");
        assert!(parsed.monotonic.is_none());
        assert_eq!(
            parsed.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            entry.timestamp.format(TIMESTAMP_FORMAT).to_string()
        );
    }

    #[test]
    fn parse_line_accepts_empty_message() {
        let entry = LogEntry::new(LogLevel::Info, "t", "");
        let parsed = LogEntry::parse_line(&entry.to_line()).expect("parse");
        assert_eq!(parsed.message, "");
    }

    #[test]
    fn parse_line_rejects_garbage() {
        assert!(LogEntry::parse_line("").is_none());
        assert!(LogEntry::parse_line("hello world").is_none());
        assert!(LogEntry::parse_line("2026-01-01 00:00:00.000 [LOUD] t: m").is_none());
        assert!(LogEntry::parse_line("yesterday [INFO] t: m").is_none());
    }

    #[test]
    fn rename_interest_admits_both_halves() {
        let target = WatchTarget::new("/tmp/x").with_events([Interest::Rename]);
        assert!(target.accepts(EventKind::Create, true));
        assert!(target.accepts(EventKind::Delete, true));
        assert!(!target.accepts(EventKind::Create, false));
        assert!(!target.accepts(EventKind::Modify, false));
        assert!(target.accepts(EventKind::Gone, false));
    }

    #[test]
    fn interest_list_parses_aliases() {
        let set = Interest::parse_list("modify, move").expect("parse");
        assert!(set.contains(&Interest::Modify));
        assert!(set.contains(&Interest::Rename));
        assert!(Interest::parse_list(" , ").is_err());
        assert!(Interest::parse_list("modify,attrib").is_err());
    }

    #[test]
    fn notification_line_keeps_spaces_in_path() {
        let event = WatchEvent::new("/data", EventKind::Modify, "/data/my file.txt");
        let line = event.to_line();
        let (at, kind, path) = parse_notification(&line).expect("parse");
        assert_eq!(kind, EventKind::Modify);
        assert_eq!(path, PathBuf::from("/data/my file.txt"));
        assert_eq!(at.timestamp_millis(), event.at.timestamp_millis());
    }
}
