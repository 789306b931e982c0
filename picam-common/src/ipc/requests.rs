//! Control request sent from a client invocation to the running daemon.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::validation::{
    validate_config_entry_len, validate_device_path, validate_key_color, validate_path,
    validate_video_length, ValidationError,
};

/// One control request.
///
/// Every setting is optional: `None` means "no change requested". The client
/// always resends `device`, `config` and `single_shot_timeout_minutes` in full,
/// so the daemon treats a differing value as a replacement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlMessage {
    /// Virtual output device for the encoder stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Capture source configuration entries (`KEY=VALUE`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<String>>,
    /// Capture a full-resolution still to this path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    /// Stop the preview after an image was captured
    pub single_shot: bool,
    /// Do not restart the preview after this request
    pub suppress_restart: bool,
    /// Auto-stop the preview after this many minutes (0 clears the deadline)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_shot_timeout_minutes: Option<u32>,
    /// Record the next part of the stream to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    /// Recording length in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_length: Option<u32>,
    /// Number of stills extracted from the recording
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_frames: Option<u32>,
    /// Frame rate of the recorded file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_fps: Option<u32>,
    /// Background image for color keying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chroma_image: Option<PathBuf>,
    /// Key color (name or `0xRRGGBB`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chroma_color: Option<String>,
    /// Key sensitivity, 0.0 disables keying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chroma_sensitivity: Option<f64>,
    /// Key edge blend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chroma_blend: Option<f64>,
    /// Shut the daemon down
    pub exit: bool,
}

impl ControlMessage {
    /// A request that only asks the daemon to exit.
    pub fn exit() -> Self {
        Self {
            exit: true,
            ..Self::default()
        }
    }

    /// Validate all parameters in this request.
    ///
    /// Returns Ok(()) if all parameters are valid, or an error describing
    /// the first invalid parameter found. Malformed `KEY=VALUE` entries are
    /// not rejected here; the daemon skips them when it applies the config.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(device) = &self.device {
            validate_device_path(device)?;
        }
        if let Some(entries) = &self.config {
            for entry in entries {
                validate_config_entry_len(entry)?;
            }
        }
        if let Some(path) = &self.image_path {
            validate_path("image_path", path)?;
        }
        if let Some(path) = &self.video_path {
            validate_path("video_path", path)?;
            // Omitted recording parameters fall back to the command-line defaults
            if let Some(len) = self.video_length {
                validate_video_length(len)?;
            }
        }
        if let Some(path) = &self.chroma_image {
            validate_path("chroma_image", path)?;
        }
        if let Some(color) = &self.chroma_color {
            validate_key_color(color)?;
        }
        Ok(())
    }
}
