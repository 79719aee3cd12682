//! Read-only view of the newest entries of a log.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use vigil_core::LogEntry;

use crate::error::{io_err, LogError};
use crate::paths::rotated_path;

/// The last `limit` entries of a log, oldest first.
///
/// Creating a `Tail` does no I/O. Files are read when iteration yields its
/// first item, and every new iteration reads them again, so the same `Tail`
/// can be polled repeatedly. When the active file holds fewer than `limit`
/// entries the newest entries of the rotated `.old` file are prepended.
/// Lines that do not parse as log entries are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tail {
    active: PathBuf,
    rotated: PathBuf,
    limit: usize,
}

impl Tail {
    pub fn new(active: PathBuf, rotated: PathBuf, limit: usize) -> Self {
        Self {
            active,
            rotated,
            limit,
        }
    }

    /// Tail of `active` with the conventional `.old` sibling.
    pub fn for_log(active: impl Into<PathBuf>, limit: usize) -> Self {
        let active = active.into();
        let rotated = rotated_path(&active);
        Self::new(active, rotated, limit)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn iter(&self) -> TailIter {
        TailIter {
            tail: self.clone(),
            state: TailState::Pending,
        }
    }

    fn load(&self) -> Result<Vec<LogEntry>, LogError> {
        if self.limit == 0 {
            return Ok(Vec::new());
        }
        let mut entries = last_entries(&self.active, self.limit)?;
        if entries.len() < self.limit {
            let mut older = last_entries(&self.rotated, self.limit - entries.len())?;
            older.append(&mut entries);
            entries = older;
        }
        Ok(entries.into())
    }
}

impl<'a> IntoIterator for &'a Tail {
    type Item = Result<LogEntry, LogError>;
    type IntoIter = TailIter;

    fn into_iter(self) -> TailIter {
        self.iter()
    }
}

/// Iterator over a [`Tail`]. Yields at most one `Err`, after which it ends.
#[derive(Debug)]
pub struct TailIter {
    tail: Tail,
    state: TailState,
}

#[derive(Debug)]
enum TailState {
    Pending,
    Ready(std::vec::IntoIter<LogEntry>),
    Done,
}

impl Iterator for TailIter {
    type Item = Result<LogEntry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, TailState::Pending) {
            match self.tail.load() {
                Ok(entries) => self.state = TailState::Ready(entries.into_iter()),
                Err(err) => {
                    self.state = TailState::Done;
                    return Some(Err(err));
                }
            }
        }
        match &mut self.state {
            TailState::Ready(entries) => entries.next().map(Ok),
            TailState::Pending | TailState::Done => None,
        }
    }
}

fn last_entries(path: &Path, limit: usize) -> Result<VecDeque<LogEntry>, LogError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(VecDeque::new()),
        Err(err) => return Err(io_err(path, err)),
    };

    let mut reader = BufReader::new(file);
    let mut tail = VecDeque::with_capacity(limit.min(1024));
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| io_err(path, e))?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let Some(entry) = LogEntry::parse_line(&line) else {
            continue;
        };
        if tail.len() == limit {
            tail.pop_front();
        }
        tail.push_back(entry);
    }
    Ok(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;
    use vigil_core::LogLevel;

    fn write_entries(path: &Path, range: std::ops::Range<usize>) {
        let text: String = range
            .map(|i| LogEntry::new(LogLevel::Info, "t", format!("m{i}")).to_line())
            .collect();
        fs::write(path, text).unwrap();
    }

    fn messages(tail: &Tail) -> Vec<String> {
        tail.iter().map(|e| e.unwrap().message).collect()
    }

    #[test]
    fn tail_returns_newest_entries_oldest_first() {
        let dir = TempDir::new().unwrap();
        let active = dir.path().join("main.log");
        write_entries(&active, 0..10);

        let tail = Tail::for_log(&active, 3);
        assert_eq!(messages(&tail), ["m7", "m8", "m9"]);
    }

    #[test]
    fn tail_falls_back_into_rotated_file() {
        let dir = TempDir::new().unwrap();
        let active = dir.path().join("main.log");
        write_entries(&rotated_path(&active), 0..5);
        write_entries(&active, 5..7);

        let tail = Tail::for_log(&active, 4);
        assert_eq!(messages(&tail), ["m3", "m4", "m5", "m6"]);
    }

    #[test]
    fn tail_is_lazy_and_restartable() {
        let dir = TempDir::new().unwrap();
        let active = dir.path().join("main.log");
        let tail = Tail::for_log(&active, 5);

        // Nothing exists yet: empty, not an error.
        assert!(messages(&tail).is_empty());

        write_entries(&active, 0..2);
        assert_eq!(messages(&tail), ["m0", "m1"]);

        // An iterator created before a write sees the write: I/O is deferred.
        let pending = tail.iter();
        write_entries(&active, 0..3);
        assert_eq!(pending.count(), 3);
    }

    #[test]
    fn tail_skips_foreign_lines() {
        let dir = TempDir::new().unwrap();
        let active = dir.path().join("main.log");
        let mut text = String::from("garbage line\n\u{fffd}\u{fffd}\n");
        text.push_str(&LogEntry::new(LogLevel::Warn, "t", "kept").to_line());
        fs::write(&active, text).unwrap();

        let tail = Tail::for_log(&active, 10);
        assert_eq!(messages(&tail), ["kept"]);
    }

    #[test]
    fn zero_limit_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let active = dir.path().join("main.log");
        write_entries(&active, 0..2);
        assert_eq!(Tail::for_log(&active, 0).iter().count(), 0);
    }
}
