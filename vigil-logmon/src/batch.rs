//! Batch input: one `LEVEL|MESSAGE` per line.
//!
//! ```text
//! # comment
//! 3|service started
//! WARN|swap usage high
//! ```
//!
//! Blank and `#` lines are skipped. A line without `|` is rejected. An
//! unreadable level falls back to `INFO` and is reported as a warning.

use vigil_core::{LogEntry, LogLevel};

#[derive(Debug, Default)]
pub struct BatchParse {
    pub entries: Vec<LogEntry>,
    /// `(line number, problem)` for every rejected or repaired line.
    pub problems: Vec<(usize, String)>,
}

pub fn parse_batch(input: &str, tag: &str) -> BatchParse {
    let mut parsed = BatchParse::default();
    for (index, raw) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((level, message)) = line.split_once('|') else {
            parsed
                .problems
                .push((line_no, "invalid format, expected LEVEL|MESSAGE".to_string()));
            continue;
        };

        let level = match level.trim().parse::<LogLevel>() {
            Ok(level) => level,
            Err(err) => {
                parsed.problems.push((line_no, err));
                LogLevel::Info
            }
        };
        parsed
            .entries
            .push(LogEntry::new(level, tag, message.trim_start()));
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_named_levels() {
        let parsed = parse_batch("1|boom\nWARN| careful\n# note\n\n4|trace", "batch");
        let levels: Vec<_> = parsed.entries.iter().map(|e| e.level).collect();
        assert_eq!(
            levels,
            [LogLevel::Error, LogLevel::Warn, LogLevel::Debug]
        );
        assert_eq!(parsed.entries[1].message, "careful");
        assert!(parsed.problems.is_empty());
    }

    #[test]
    fn reports_bad_lines_with_line_numbers() {
        let parsed = parse_batch("no separator\n9|odd level", "batch");
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].level, LogLevel::Info);
        let lines: Vec<_> = parsed.problems.iter().map(|(n, _)| *n).collect();
        assert_eq!(lines, [1, 2]);
    }

    #[test]
    fn message_may_contain_separator() {
        let parsed = parse_batch("3|a|b", "batch");
        assert_eq!(parsed.entries[0].message, "a|b");
    }
}
