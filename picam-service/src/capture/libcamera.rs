//! Raspberry Pi camera through the libcamera apps.
//!
//! The preview is an `rpicam-vid` child streaming MJPEG to stdout. Stills are
//! taken with `rpicam-still`, which needs exclusive access to the sensor, so a
//! running preview is stopped for the capture and started again afterwards.

use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CameraSettings, CaptureError, CaptureSource, JpegFrameReader};
use crate::config::CameraConfig;
use crate::process::{forward_stderr, interrupt_and_reap};

const VIDEO_COMMANDS: &[&str] = &["rpicam-vid", "libcamera-vid"];
const STILL_COMMANDS: &[&str] = &["rpicam-still", "libcamera-still"];

/// Time the preview process gets to release the camera after SIGINT
const STOP_GRACE: Duration = Duration::from_secs(2);

/// First of `candidates` found in PATH, or the first name as a fallback.
fn resolve_command(configured: Option<&str>, candidates: &[&str]) -> String {
    if let Some(command) = configured {
        return command.to_string();
    }
    candidates
        .iter()
        .find(|name| which::which(name).is_ok())
        .or(candidates.first())
        .map(|name| name.to_string())
        .unwrap_or_default()
}

/// Translate `KEY=VALUE` overrides into still-app flags.
///
/// `size=WxH` maps onto `--width`/`--height`, every other key onto `--key value`.
pub fn still_option_args(settings: &CameraSettings) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in &settings.still_options {
        if key == "size" {
            if let Some((w, h)) = value.split_once('x') {
                args.extend(["--width".into(), w.into(), "--height".into(), h.into()]);
                continue;
            }
            warn!("Invalid size value {}, expected WIDTHxHEIGHT", value);
            continue;
        }
        args.push(format!("--{}", key));
        args.push(value.clone());
    }
    args
}

struct Preview {
    child: Child,
    reader: JpegFrameReader<ChildStdout>,
}

pub struct LibcameraSource {
    config: CameraConfig,
    video_command: String,
    still_command: String,
    preview: Option<Preview>,
}

impl LibcameraSource {
    pub fn new(config: CameraConfig) -> Self {
        let video_command = resolve_command(config.video_command.as_deref(), VIDEO_COMMANDS);
        let still_command = resolve_command(config.still_command.as_deref(), STILL_COMMANDS);
        debug!(%video_command, %still_command, "Camera commands resolved");
        Self {
            config,
            video_command,
            still_command,
            preview: None,
        }
    }

    fn preview_args(&self) -> Vec<String> {
        vec![
            "-t".into(),
            "0".into(),
            "-n".into(),
            "--codec".into(),
            "mjpeg".into(),
            "--width".into(),
            self.config.preview_width.to_string(),
            "--height".into(),
            self.config.preview_height.to_string(),
            "--framerate".into(),
            self.config.preview_framerate.to_string(),
            "-o".into(),
            "-".into(),
        ]
    }

    fn still_args(&self, path: &Path, settings: &CameraSettings) -> Vec<String> {
        let mut args = vec![
            "-n".into(),
            "-t".into(),
            self.config.still_timeout_ms.to_string(),
        ];
        args.extend(still_option_args(settings));
        args.extend(["-o".into(), path.to_string_lossy().into_owned()]);
        args
    }
}

impl CaptureSource for LibcameraSource {
    fn start(&mut self, _settings: &CameraSettings) -> Result<(), CaptureError> {
        if self.preview.is_some() {
            return Ok(());
        }
        let mut child = Command::new(&self.video_command)
            .args(self.preview_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                command: self.video_command.clone(),
                source,
            })?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr("camera", stderr);
        }
        let Some(stdout) = child.stdout.take() else {
            interrupt_and_reap(&mut child, STOP_GRACE);
            return Err(CaptureError::StreamEnded);
        };

        info!(pid = child.id(), command = %self.video_command, "Camera preview started");
        self.preview = Some(Preview {
            child,
            reader: JpegFrameReader::new(stdout),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(mut preview) = self.preview.take() {
            interrupt_and_reap(&mut preview.child, STOP_GRACE);
            info!("Camera preview stopped");
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.preview.is_some()
    }

    fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        let preview = self.preview.as_mut().ok_or(CaptureError::NotStarted)?;
        preview.reader.next_frame()
    }

    fn capture_still(&mut self, path: &Path, settings: &CameraSettings) -> Result<(), CaptureError> {
        let resume = self.is_started();
        if resume {
            self.stop()?;
        }

        let args = self.still_args(path, settings);
        debug!(command = %self.still_command, ?args, "Capturing still");
        let result = Command::new(&self.still_command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output();

        let outcome = match result {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(CaptureError::Still(
                    stderr
                        .lines()
                        .last()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("exit status {}", output.status)),
                ))
            }
            Err(source) => Err(CaptureError::Spawn {
                command: self.still_command.clone(),
                source,
            }),
        };

        if resume {
            if let Err(e) = self.start(settings) {
                warn!("Failed to resume camera preview after still: {}", e);
            }
        }
        outcome
    }
}

impl Drop for LibcameraSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_override_maps_to_dimensions() {
        let settings = CameraSettings {
            still_options: vec![
                ("size".into(), "4056x3040".into()),
                ("shutter".into(), "20000".into()),
                ("size".into(), "big".into()),
            ],
        };
        assert_eq!(
            still_option_args(&settings),
            vec!["--width", "4056", "--height", "3040", "--shutter", "20000"]
        );
    }

    #[test]
    fn configured_command_wins() {
        assert_eq!(
            resolve_command(Some("/opt/bin/cam"), VIDEO_COMMANDS),
            "/opt/bin/cam"
        );
        let resolved = resolve_command(None, VIDEO_COMMANDS);
        assert!(VIDEO_COMMANDS.contains(&resolved.as_str()));
    }

    #[test]
    fn preview_streams_mjpeg_to_stdout() {
        let source = LibcameraSource::new(CameraConfig::default());
        let args = source.preview_args();
        assert_eq!(args[..5], ["-t", "0", "-n", "--codec", "mjpeg"]);
        assert_eq!(args[args.len() - 2..], ["-o", "-"]);
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let config = CameraConfig {
            video_command: Some("/nonexistent/rpicam-vid".into()),
            ..CameraConfig::default()
        };
        let mut source = LibcameraSource::new(config);
        assert!(matches!(
            source.start(&CameraSettings::default()),
            Err(CaptureError::Spawn { .. })
        ));
        assert!(!source.is_started());
    }
}
