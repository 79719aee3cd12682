use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOG_EXTENSION: &str = "log";
pub const ROTATED_SUFFIX: &str = ".old";
pub const CONTROL_SOCKET: &str = "logmonitor.sock";

/// Log written by the daemon itself.
pub const MAIN_LOG: &str = "main";

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(15);

pub fn log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{LOG_EXTENSION}"))
}

/// `<name>.log` → `<name>.log.old`
pub fn rotated_path(active: &Path) -> PathBuf {
    let mut name = active
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| format!("{MAIN_LOG}.{LOG_EXTENSION}").into());
    name.push(ROTATED_SUFFIX);
    active.with_file_name(name)
}

pub fn socket_path(dir: &Path) -> PathBuf {
    dir.join(CONTROL_SOCKET)
}

/// True for `*.log` and `*.log.old` file names.
pub fn is_log_file_name(name: &str) -> bool {
    let name = name.strip_suffix(ROTATED_SUFFIX).unwrap_or(name);
    name.len() > LOG_EXTENSION.len() + 1 && name.ends_with(&format!(".{LOG_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_path_appends_old_suffix() {
        let active = log_path(Path::new("/logs"), "service");
        assert_eq!(active, PathBuf::from("/logs/service.log"));
        assert_eq!(rotated_path(&active), PathBuf::from("/logs/service.log.old"));
    }

    #[test]
    fn log_file_names_are_recognised() {
        assert!(is_log_file_name("main.log"));
        assert!(is_log_file_name("main.log.old"));
        assert!(!is_log_file_name(".log"));
        assert!(!is_log_file_name("logmonitor.sock"));
        assert!(!is_log_file_name("notes.txt"));
    }
}
