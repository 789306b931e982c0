//! Log directory resolution.

use std::path::PathBuf;

const APP_NAME: &str = "picam";

/// Returns the directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/picam/logs` or `~/.local/state/picam/logs` |
/// | other | `<data local dir>/picam/logs` |
///
/// Falls back to `./logs` when no home directory can be determined
/// (e.g. a stripped-down service account).
pub fn log_dir() -> PathBuf {
    match directories::ProjectDirs::from("", "", APP_NAME) {
        Some(base) => base
            .state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().join("state"))
            .join("logs"),
        None => PathBuf::from("logs"),
    }
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<PathBuf, std::io::Error> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// File name prefix for the daily rolling service log
/// (e.g. `picam-service.log.2026-03-01`).
pub const SERVICE_LOG_PREFIX: &str = "picam-service.log";

/// Returns the directory holding `config.json`, if a home directory exists.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dir_ends_with_logs() {
        assert!(log_dir().ends_with("logs"));
    }

    #[test]
    fn config_dir_mentions_app_name() {
        if let Some(dir) = config_dir() {
            assert!(dir.to_string_lossy().contains(APP_NAME));
        }
    }
}
