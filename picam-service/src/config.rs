//! Daemon configuration.
//!
//! Loaded from `config.json` in the platform config directory:
//! - Linux: `~/.config/picam/config.json`
//!
//! Every field has a default, so a missing or partial file is fine. A file
//! that cannot be read or parsed is ignored with a warning.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use picam_common::ipc::DEFAULT_CONTROL_PORT;

/// Camera backend commands and preview stream geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Preview streaming command, defaults to `rpicam-vid` or `libcamera-vid` from PATH
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_command: Option<String>,
    /// Still capture command, defaults to `rpicam-still` or `libcamera-still` from PATH
    #[serde(skip_serializing_if = "Option::is_none")]
    pub still_command: Option<String>,
    pub preview_width: u32,
    pub preview_height: u32,
    pub preview_framerate: u32,
    /// Metering time before a still is taken
    pub still_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            video_command: None,
            still_command: None,
            preview_width: 640,
            preview_height: 480,
            preview_framerate: 30,
            still_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// TCP port of the control protocol
    pub control_port: u16,
    /// ffmpeg binary; resolved from PATH when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
    pub camera: CameraConfig,
    /// Wait before reconnecting a failed camera
    pub reconnect_backoff_ms: u64,
    /// Sleep between polls while not capturing
    pub idle_interval_ms: u64,
    /// Also write a daily rolling log file
    pub file_logging: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            ffmpeg_path: None,
            camera: CameraConfig::default(),
            reconnect_backoff_ms: 1000,
            idle_interval_ms: 100,
            file_logging: true,
        }
    }
}

impl ServiceConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

/// Where the active configuration came from.
///
/// Loading happens before logging is set up, so the outcome is reported
/// afterwards through [`ConfigSource::log`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
    Invalid { path: PathBuf, error: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded config from {}", path.display()),
            ConfigSource::Defaults => info!("No config file found, using defaults"),
            ConfigSource::Invalid { path, error } => {
                warn!("Failed to load {}: {}. Using defaults.", path.display(), error)
            }
        }
    }
}

/// Get the path to the config file.
pub fn config_path() -> Option<PathBuf> {
    picam_common::logging::config_dir().map(|dir| dir.join("config.json"))
}

/// Load configuration from the default location.
pub fn load_config() -> (ServiceConfig, ConfigSource) {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => (ServiceConfig::default(), ConfigSource::Defaults),
    }
}

/// Load configuration from `path`, falling back to defaults.
pub fn load_config_from(path: &Path) -> (ServiceConfig, ConfigSource) {
    if !path.exists() {
        return (ServiceConfig::default(), ConfigSource::Defaults);
    }

    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|contents| {
            serde_json::from_str::<ServiceConfig>(&contents).map_err(|e| e.to_string())
        });

    match parsed {
        Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
        Err(error) => (
            ServiceConfig::default(),
            ConfigSource::Invalid {
                path: path.to_path_buf(),
                error,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = load_config_from(&dir.path().join("config.json"));
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config.control_port, 5555);
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(1));
        assert_eq!(config.idle_interval(), Duration::from_millis(100));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"control_port": 6000, "camera": {"preview_width": 1280}}"#,
        )
        .unwrap();

        let (config, source) = load_config_from(&path);
        assert_eq!(source, ConfigSource::File(path));
        assert_eq!(config.control_port, 6000);
        assert_eq!(config.camera.preview_width, 1280);
        assert_eq!(config.camera.preview_height, 480);
        assert!(config.file_logging);
    }

    #[test]
    fn invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let (config, source) = load_config_from(&path);
        assert_eq!(config, ServiceConfig::default());
        assert!(matches!(source, ConfigSource::Invalid { .. }));
    }
}
