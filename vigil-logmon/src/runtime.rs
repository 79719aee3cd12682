use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, SecondsFormat};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use vigil_core::{LogEntry, LogLevel, LogMonitorConfig, DEFAULT_TAG};

use crate::error::{io_err, LogError};
use crate::monitor::LogMonitor;
use crate::paths::{socket_path, FLUSH_INTERVAL, MAIN_LOG};
use crate::protocol::{DaemonStatus, LogRequest, LogResponse, DEFAULT_TAIL_LINES};

/// Set to `json` to render diagnostics as JSON objects.
pub const LOG_FORMAT_ENV: &str = "VIGIL_LOG_FORMAT";

/// Fixed facts reported by `status`.
#[derive(Debug, Clone)]
struct DaemonInfo {
    socket: PathBuf,
    started_at: String,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: LogMonitorConfig) -> Result<(), LogError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the daemon until a signal or a `stop` request.
///
/// Startup failures (directory, config, socket in use) are returned before
/// any task is spawned.
pub async fn run(config: LogMonitorConfig) -> Result<(), LogError> {
    let monitor = Arc::new(LogMonitor::open(&config)?);

    let socket = socket_path(monitor.dir());
    prepare_socket_for_bind(&socket)?;
    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    let info = Arc::new(DaemonInfo {
        socket: socket.clone(),
        started_at: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
    });
    record(&monitor, "daemon started");
    tracing::info!(
        dir = %monitor.dir().display(),
        socket = %socket.display(),
        max_bytes = monitor.max_bytes(),
        level = %monitor.level(),
        "log monitor started",
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let monitor = monitor.clone();
        let info = info.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(listener, monitor, info, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let flush_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let monitor = monitor.clone();
        tokio::spawn(async move {
            let result = flush_task(monitor, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = wait_for_shutdown_signal() => {
                    match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "shutting down log monitor");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => {
                            let _ = shutdown.send(());
                            Err(LogError::Protocol(format!("signal handler failed: {err}")))
                        }
                    }
                }
            }
        })
    };

    let (socket_result, flush_result, signal_result) =
        tokio::join!(socket_handle, flush_handle, signal_handle);

    record(&monitor, "daemon stopping");
    if let Err(err) = monitor.flush_all() {
        tracing::warn!(error = %err, "final flush failed");
    }
    monitor.close_all();
    remove_socket(&socket);
    tracing::info!("log monitor stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("flush", flush_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM. Returns the signal name.
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
    }
}

/// Install the stderr diagnostics subscriber (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

async fn socket_server_task(
    listener: UnixListener,
    monitor: Arc<LogMonitor>,
    info: Arc<DaemonInfo>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LogError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&info.socket, e))?;
                let monitor = monitor.clone();
                let info = info.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, monitor, info, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    monitor: Arc<LogMonitor>,
    info: Arc<DaemonInfo>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), LogError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("log monitor socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: LogRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &LogResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        if request.cmd == "stop" {
            write_response(&mut writer, &LogResponse::ok(json!({ "stopping": true }))).await?;
            let _ = shutdown_tx.send(());
            break;
        }

        let monitor = monitor.clone();
        let info = info.clone();
        let response = tokio::task::spawn_blocking(move || dispatch(&monitor, &info, request))
            .await
            .unwrap_or_else(|err| LogResponse::error(format!("request task failed: {err}")));
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

/// Execute one request against the monitor. Failures become error responses.
fn dispatch(monitor: &LogMonitor, info: &DaemonInfo, request: LogRequest) -> LogResponse {
    let cmd = request.cmd.clone();
    match execute(monitor, info, request) {
        Ok(data) => LogResponse::ok(data),
        Err(err) => {
            tracing::error!(cmd = %cmd, error = %err, "request failed");
            LogResponse::error(err.to_string())
        }
    }
}

fn execute(monitor: &LogMonitor, info: &DaemonInfo, request: LogRequest) -> Result<Value, LogError> {
    let log = request.log.as_deref().unwrap_or(MAIN_LOG);
    let tag = request.tag.as_deref().unwrap_or(DEFAULT_TAG);

    match request.cmd.as_str() {
        "append" => {
            let message = request
                .message
                .ok_or_else(|| LogError::Protocol("append requires 'message'".to_string()))?;
            let entry = LogEntry::new(request.level.unwrap_or_default(), tag, message);
            let written = monitor.append(log, &entry)?;
            Ok(json!({ "written": written }))
        }
        "batch" => {
            let items = request
                .entries
                .ok_or_else(|| LogError::Protocol("batch requires 'entries'".to_string()))?;
            let entries: Vec<LogEntry> = items
                .into_iter()
                .map(|item| LogEntry::new(item.level, tag, item.message))
                .collect();
            let written = monitor.append_batch(log, &entries)?;
            Ok(json!({ "written": written, "received": entries.len() }))
        }
        "tail" => {
            let limit = request.lines.unwrap_or(DEFAULT_TAIL_LINES);
            let lines = monitor
                .tail(log, limit)?
                .iter()
                .map(|entry| entry.map(|entry| entry.to_line().trim_end().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "lines": lines }))
        }
        "rotate" => {
            monitor.rotate(log)?;
            Ok(json!({ "rotated": log }))
        }
        "flush" => {
            monitor.flush_all()?;
            Ok(json!({ "flushed": true }))
        }
        "clean" => {
            let removed = monitor.clean()?;
            Ok(json!({ "removed": removed }))
        }
        "status" => {
            let status = DaemonStatus {
                pid: std::process::id(),
                dir: monitor.dir().display().to_string(),
                socket: info.socket.display().to_string(),
                started_at: info.started_at.clone(),
                level: monitor.level(),
                max_bytes: monitor.max_bytes(),
                logs: monitor.status()?,
            };
            Ok(serde_json::to_value(status)?)
        }
        other => Err(LogError::Protocol(format!("unknown command '{other}'"))),
    }
}

async fn flush_task(
    monitor: Arc<LogMonitor>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LogError> {
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let monitor = monitor.clone();
                // flush_all logs its own failures; the daemon keeps serving
                let _ = tokio::task::spawn_blocking(move || monitor.flush_all()).await;
            }
        }
    }
    Ok(())
}

/// Write one of the daemon's own lifecycle lines into the main log.
fn record(monitor: &LogMonitor, message: &str) {
    let entry = LogEntry::new(LogLevel::Info, DEFAULT_TAG, message);
    if let Err(err) = monitor.append(MAIN_LOG, &entry) {
        tracing::error!(error = %err, line = message, "cannot write to main log");
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), LogError> {
    if !socket.exists() {
        return Ok(());
    }
    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(LogError::Protocol(format!(
                "log monitor socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale log monitor socket before bind",
            );
        }
    }
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn remove_socket(socket: &Path) {
    match fs::remove_file(socket) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(socket = %socket.display(), error = %err, "cannot remove socket"),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &LogResponse,
) -> Result<(), LogError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("log monitor socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("log monitor socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("log monitor socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), LogError>, tokio::task::JoinError>,
) -> Result<(), LogError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(LogError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), LogError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), LogError> {
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
