//! Camera capture.
//!
//! The daemon talks to the camera through the [`CaptureSource`] trait.
//! [`CaptureAdapter`] wraps a source with the reconnect logic the daemon
//! relies on: reconnecting never fails loudly, it logs and leaves the source
//! disconnected so the next frame pull reports the fault again.

pub mod libcamera;
mod mjpeg;

pub use libcamera::LibcameraSource;
pub use mjpeg::JpegFrameReader;

use picam_common::validation::parse_config_entry;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera not started")]
    NotStarted,
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("camera stream ended")]
    StreamEnded,
    #[error("camera frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },
    #[error("camera I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("still capture failed: {0}")]
    Still(String),
}

/// Still-capture options built from `KEY=VALUE` overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraSettings {
    pub still_options: Vec<(String, String)>,
}

impl CameraSettings {
    /// Build settings from raw entries. Malformed entries are logged and skipped.
    pub fn from_overrides(overrides: Option<&[String]>) -> Self {
        let mut still_options = Vec::new();
        for entry in overrides.unwrap_or_default() {
            match parse_config_entry(entry) {
                Ok((key, value)) => still_options.push((key.to_string(), value.to_string())),
                Err(e) => warn!("{}, skipping", e),
            }
        }
        Self { still_options }
    }
}

/// Narrow interface to the imaging source.
pub trait CaptureSource {
    /// Start the preview stream.
    fn start(&mut self, settings: &CameraSettings) -> Result<(), CaptureError>;
    /// Stop the preview stream and release the camera.
    fn stop(&mut self) -> Result<(), CaptureError>;
    fn is_started(&self) -> bool;
    /// Blocking pull of one JPEG preview frame.
    fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError>;
    /// Full-resolution still written to `path`.
    fn capture_still(&mut self, path: &Path, settings: &CameraSettings)
        -> Result<(), CaptureError>;
}

pub struct CaptureAdapter<S: CaptureSource> {
    source: S,
    settings: CameraSettings,
}

impl<S: CaptureSource> CaptureAdapter<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            settings: CameraSettings::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn is_started(&self) -> bool {
        self.source.is_started()
    }

    /// Stop if started, rebuild the settings from `overrides`, start again.
    ///
    /// Returns whether the source is connected afterwards.
    pub fn reconnect(&mut self, overrides: Option<&[String]>) -> bool {
        if let Some(entries) = overrides {
            info!(config = ?entries, "Setting camera config");
        }
        self.settings = CameraSettings::from_overrides(overrides);

        if self.source.is_started() {
            if let Err(e) = self.source.stop() {
                warn!("Failed to stop camera before reconnect: {}", e);
            }
        }

        match self.source.start(&self.settings) {
            Ok(()) => {
                info!("Connected to camera");
                true
            }
            Err(e) => {
                error!("An error occurred connecting to the camera: {}", e);
                false
            }
        }
    }

    /// Release the camera. Errors are logged.
    pub fn stop(&mut self) {
        if !self.source.is_started() {
            return;
        }
        if let Err(e) = self.source.stop() {
            warn!("Failed to stop camera: {}", e);
        }
    }

    pub fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        if !self.source.is_started() {
            return Err(CaptureError::NotStarted);
        }
        self.source.capture_frame()
    }

    pub fn capture_still(&mut self, path: &Path) -> Result<(), CaptureError> {
        self.source.capture_still(path, &self.settings)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted capture source for tests.

    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    pub struct MockSource {
        pub started: bool,
        pub starts: usize,
        pub stops: usize,
        pub fail_start: bool,
        pub fail_still: bool,
        /// Scripted frame results; an empty queue yields a small frame
        pub frames: VecDeque<Result<Vec<u8>, CaptureError>>,
        pub stills: Vec<std::path::PathBuf>,
        pub last_settings: Option<CameraSettings>,
    }

    impl CaptureSource for MockSource {
        fn start(&mut self, settings: &CameraSettings) -> Result<(), CaptureError> {
            self.starts += 1;
            self.last_settings = Some(settings.clone());
            if self.fail_start {
                return Err(CaptureError::NotStarted);
            }
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            self.stops += 1;
            self.started = false;
            Ok(())
        }

        fn is_started(&self) -> bool {
            self.started
        }

        fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
            self.frames
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0xFF, 0xD8, 0xFF, 0xD9]))
        }

        fn capture_still(
            &mut self,
            path: &Path,
            _settings: &CameraSettings,
        ) -> Result<(), CaptureError> {
            if self.fail_still {
                return Err(CaptureError::Still("mock".into()));
            }
            std::fs::write(path, b"still")?;
            self.stills.push(path.to_path_buf());
            Ok(())
        }
    }
}
