use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_core::{LogEntry, LogLevel};

use crate::error::{io_err, LogError};
use crate::monitor::LogStatus;
use crate::paths::socket_path;

pub const DEFAULT_TAIL_LINES: usize = 20;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRequest {
    pub cmd: String,
    /// Target log name; the daemon's own log when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<BatchItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
}

impl LogRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }

    fn for_log(cmd: &str, log: &str) -> Self {
        Self {
            log: Some(log.to_string()),
            ..Self::command(cmd)
        }
    }
}

/// One line of a `batch` request. Entries are stamped when the daemon receives them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub level: LogLevel,
    pub message: String,
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Payload of the `status` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub dir: String,
    pub socket: String,
    pub started_at: String,
    pub level: LogLevel,
    pub max_bytes: u64,
    pub logs: Vec<LogStatus>,
}

/// Send one JSON request to the monitor socket in `dir` and return one response.
pub fn send_request(dir: &Path, request: &LogRequest) -> Result<LogResponse, LogError> {
    let socket = socket_path(dir);
    if !socket.exists() {
        return Err(LogError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            LogError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(LogError::Protocol(
            "log monitor closed connection before responding".to_string(),
        ));
    }

    let response: LogResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// True when a monitor answers on the socket in `dir`.
pub fn is_running(dir: &Path) -> bool {
    send_request(dir, &LogRequest::command("status"))
        .map(|response| response.ok)
        .unwrap_or(false)
}

/// Returns `false` when the daemon filtered the entry by level.
pub fn request_append(dir: &Path, log: &str, entry: &LogEntry) -> Result<bool, LogError> {
    let request = LogRequest {
        level: Some(entry.level),
        tag: Some(entry.tag.clone()),
        message: Some(entry.message.clone()),
        ..LogRequest::for_log("append", log)
    };
    let data = response_into_data(send_request(dir, &request)?)?;
    Ok(data["written"].as_bool().unwrap_or(false))
}

/// Send `entries` as one contiguous batch under `tag`. Returns how many were written.
pub fn request_batch(
    dir: &Path,
    log: &str,
    tag: &str,
    entries: &[LogEntry],
) -> Result<usize, LogError> {
    let items = entries
        .iter()
        .map(|entry| BatchItem {
            level: entry.level,
            message: entry.message.clone(),
        })
        .collect();
    let request = LogRequest {
        tag: Some(tag.to_string()),
        entries: Some(items),
        ..LogRequest::for_log("batch", log)
    };
    let data = response_into_data(send_request(dir, &request)?)?;
    Ok(data["written"].as_u64().unwrap_or(0) as usize)
}

/// Newest `lines` entries of `log`, oldest first, as written on disk.
pub fn request_tail(dir: &Path, log: &str, lines: usize) -> Result<Vec<String>, LogError> {
    let request = LogRequest {
        lines: Some(lines),
        ..LogRequest::for_log("tail", log)
    };
    let data = response_into_data(send_request(dir, &request)?)?;
    let lines: Vec<String> = serde_json::from_value(data["lines"].clone())?;
    Ok(lines)
}

pub fn request_rotate(dir: &Path, log: &str) -> Result<(), LogError> {
    let response = send_request(dir, &LogRequest::for_log("rotate", log))?;
    response_into_data(response).map(|_| ())
}

pub fn request_flush(dir: &Path) -> Result<(), LogError> {
    let response = send_request(dir, &LogRequest::command("flush"))?;
    response_into_data(response).map(|_| ())
}

/// Returns the number of files the daemon removed.
pub fn request_clean(dir: &Path) -> Result<usize, LogError> {
    let data = response_into_data(send_request(dir, &LogRequest::command("clean"))?)?;
    Ok(data["removed"].as_u64().unwrap_or(0) as usize)
}

pub fn request_status(dir: &Path) -> Result<DaemonStatus, LogError> {
    let request = LogRequest::command("status");

    let mut last_not_running: Option<LogError> = None;
    for attempt in 0..5 {
        match send_request(dir, &request) {
            Ok(response) => {
                let data = response_into_data(response)?;
                return Ok(serde_json::from_value(data)?);
            }
            Err(err @ LogError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        LogError::Protocol("log monitor status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(dir: &Path) -> Result<(), LogError> {
    let response = send_request(dir, &LogRequest::command("stop"))?;
    response_into_data(response).map(|_| ())
}

fn response_into_data(response: LogResponse) -> Result<Value, LogError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(LogError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown log monitor error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn request_omits_absent_fields() {
        let request = LogRequest::for_log("rotate", "service");
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded, json!({"cmd": "rotate", "log": "service"}));
    }

    #[test]
    fn request_accepts_numeric_levels() {
        let request: LogRequest = serde_json::from_str(
            r#"{"cmd":"batch","tag":"x","entries":[{"level":1,"message":"a"},{"level":"debug","message":"b"}]}"#,
        )
        .unwrap();
        let levels: Vec<_> = request
            .entries
            .unwrap()
            .into_iter()
            .map(|item| item.level)
            .collect();
        assert_eq!(levels, [LogLevel::Error, LogLevel::Debug]);
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let dir = TempDir::new().unwrap();
        let err = send_request(dir.path(), &LogRequest::command("status")).unwrap_err();
        assert!(matches!(err, LogError::DaemonNotRunning { .. }));
        assert!(!is_running(dir.path()));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(LogResponse::error("boom")).unwrap_err();
        assert!(matches!(err, LogError::Protocol(message) if message == "boom"));
    }
}
