//! Size-bounded log files with one rotated generation, plus the resident
//! daemon that serializes writers through a Unix control socket.

pub mod batch;
mod error;
pub mod monitor;
pub mod paths;
pub mod protocol;
pub mod runtime;
mod sink;
mod tail;

pub use batch::{parse_batch, BatchParse};
pub use error::LogError;
pub use monitor::{validate_log_name, LogMonitor, LogStatus};
pub use protocol::{
    is_running, request_append, request_batch, request_clean, request_flush, request_rotate,
    request_status, request_stop, request_tail, send_request, DaemonStatus, LogRequest,
    LogResponse,
};
pub use runtime::{init_tracing, run, start_blocking, wait_for_shutdown_signal};
pub use sink::{LogFileStats, LogSink};
pub use tail::{Tail, TailIter};
