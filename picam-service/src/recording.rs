//! Bounded-duration recordings.
//!
//! The encoder writes a recording to `<path>.temp.mp4`. Once the requested
//! duration has elapsed the encoder exits, the next frame write fails with a
//! broken pipe, and the temp file is renamed to `<path>`. Existing artifacts
//! at either path block a new recording so nothing is overwritten.

use picam_common::ipc::ControlMessage;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::encoder::EncoderExit;

pub const TEMP_VIDEO_SUFFIX: &str = ".temp.mp4";

/// Upper bound for stills extracted from one recording (two-digit file index)
pub const MAX_STILL_FRAMES: u32 = 99;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording length must be at least one second")]
    InvalidDuration,
    #[error("recording frame rate must be positive")]
    InvalidFrameRate,
    #[error("recording target {} or its temp file already exists", .0.display())]
    Conflict(PathBuf),
    #[error("failed to rename {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn append_to_path(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingRequest {
    final_path: PathBuf,
    temp_path: PathBuf,
    duration_seconds: u32,
    target_fps: u32,
    still_frame_count: u32,
}

impl RecordingRequest {
    pub fn new(
        final_path: impl Into<PathBuf>,
        duration_seconds: u32,
        target_fps: u32,
        still_frame_count: u32,
    ) -> Result<Self, RecordingError> {
        if duration_seconds == 0 {
            return Err(RecordingError::InvalidDuration);
        }
        if target_fps == 0 {
            return Err(RecordingError::InvalidFrameRate);
        }
        let final_path = final_path.into();
        let temp_path = append_to_path(&final_path, TEMP_VIDEO_SUFFIX);
        Ok(Self {
            final_path,
            temp_path,
            duration_seconds,
            target_fps,
            still_frame_count: still_frame_count.min(MAX_STILL_FRAMES),
        })
    }

    /// Build a request from a control message, falling back to the
    /// command-line defaults for omitted parameters. `None` when the message
    /// does not ask for a recording.
    pub fn from_message(msg: &ControlMessage) -> Option<Result<Self, RecordingError>> {
        let path = msg.video_path.as_ref()?;
        Some(Self::new(
            path,
            msg.video_length.unwrap_or(3),
            msg.video_fps.unwrap_or(10),
            msg.video_frames.unwrap_or(4),
        ))
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn still_frame_count(&self) -> u32 {
        self.still_frame_count
    }

    /// Rate at which stills are sampled so that `still_frame_count` of them
    /// cover the whole recording.
    pub fn still_fps(&self) -> f64 {
        f64::from(self.still_frame_count) / f64::from(self.duration_seconds)
    }

    /// Output pattern for extracted stills, `<path>-NN.jpg`.
    pub fn still_pattern(&self) -> PathBuf {
        append_to_path(&self.final_path, "-%02d.jpg")
    }

    pub fn artifacts_exist(&self) -> bool {
        self.final_path.exists() || self.temp_path.exists()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RecordingState {
    #[default]
    Idle,
    /// Accepted, waiting for the next encoder restart
    Requested(RecordingRequest),
    /// The running encoder owns the temp file
    InProgress(RecordingRequest),
}

/// What the daemon has to do after the encoder pipe broke.
#[derive(Debug, Clone, PartialEq)]
pub enum PipeResolution {
    /// Recording completed and was moved to its final path
    Finalized(PathBuf),
    /// Recording completed but could not be moved; the temp file is left behind
    RenameFailed,
    /// The encoder died without producing a usable file
    EncoderFailed,
    /// No recording was running
    NotRecording,
}

impl PipeResolution {
    /// Whether the capture source has to be reconnected before streaming resumes.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, PipeResolution::EncoderFailed | PipeResolution::NotRecording)
    }
}

#[derive(Debug, Default)]
pub struct RecordingTracker {
    state: RecordingState,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == RecordingState::Idle
    }

    /// Accept a new recording. Rejected when artifacts of a previous run exist.
    pub fn request(&mut self, request: RecordingRequest) -> Result<(), RecordingError> {
        if let RecordingState::InProgress(current) = &self.state {
            warn!(
                path = %current.final_path.display(),
                "Recording superseded by a new request, partial file is kept"
            );
        }
        if request.artifacts_exist() {
            self.state = RecordingState::Idle;
            return Err(RecordingError::Conflict(request.final_path));
        }
        info!(
            path = %request.final_path.display(),
            seconds = request.duration_seconds,
            fps = request.target_fps,
            stills = request.still_frame_count,
            "Recording requested"
        );
        self.state = RecordingState::Requested(request);
        Ok(())
    }

    /// The recording the next encoder should write, if any.
    pub fn pending(&self) -> Option<&RecordingRequest> {
        match &self.state {
            RecordingState::Requested(request) => Some(request),
            _ => None,
        }
    }

    /// Account for an encoder restart. `file_outputs` tells whether the new
    /// encoder was launched with the pending recording attached.
    pub fn on_restart(&mut self, file_outputs: bool) {
        self.state = match std::mem::take(&mut self.state) {
            RecordingState::Requested(request) if file_outputs => {
                RecordingState::InProgress(request)
            }
            RecordingState::Requested(request) => {
                warn!(
                    path = %request.final_path.display(),
                    "Recording skipped, file or temp file already exists"
                );
                RecordingState::Idle
            }
            RecordingState::InProgress(request) => {
                warn!(
                    path = %request.final_path.display(),
                    "Encoder restarted during recording, recording aborted"
                );
                RecordingState::Idle
            }
            RecordingState::Idle => RecordingState::Idle,
        };
    }

    /// Decide whether a broken encoder pipe means "recording done" or
    /// "encoder crashed". A finished encoder leaves the temp file behind and
    /// does not report a failing exit code.
    pub fn resolve_broken_pipe(&mut self, exit: EncoderExit) -> PipeResolution {
        let request = match std::mem::take(&mut self.state) {
            RecordingState::InProgress(request) => request,
            other => {
                self.state = other;
                return PipeResolution::NotRecording;
            }
        };

        if !request.temp_path.exists() {
            warn!(
                path = %request.final_path.display(),
                ?exit,
                "Video recording failed, no temp file was written"
            );
            return PipeResolution::EncoderFailed;
        }

        if let EncoderExit::Failed(code) = exit {
            warn!(
                temp = %request.temp_path.display(),
                ?code,
                "Encoder exited with an error, partial recording left in place"
            );
            return PipeResolution::EncoderFailed;
        }

        match std::fs::rename(&request.temp_path, &request.final_path) {
            Ok(()) => {
                info!(path = %request.final_path.display(), "Video recording successful");
                PipeResolution::Finalized(request.final_path)
            }
            Err(source) => {
                let err = RecordingError::Rename {
                    from: request.temp_path,
                    to: request.final_path,
                    source,
                };
                warn!("{}", err);
                PipeResolution::RenameFailed
            }
        }
    }
}
