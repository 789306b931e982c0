//! Encoder pipeline using FFmpeg via ffmpeg-sidecar.
//!
//! Exactly one ffmpeg child is alive at a time. It reads JPEG frames on
//! stdin and writes to the virtual output device, plus the recording outputs
//! when a recording is attached. Restarts kill the previous child without a
//! grace period since new frames are written right after.

mod ffmpeg;

pub use ffmpeg::{ensure_ffmpeg, resolve_ffmpeg_path, FfmpegLauncher, FfmpegProcess};

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chroma::ChromaConfig;
use crate::recording::RecordingRequest;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("encoder is not running")]
    NotRunning,
    #[error("encoder pipe broken: {0}")]
    BrokenPipe(#[source] std::io::Error),
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("ffmpeg stdin unavailable")]
    NoStdin,
    #[error("ffmpeg exited with status {0:?}")]
    ExitStatus(Option<i32>),
    #[error("failed to replace {}: {source}", .path.display())]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ffmpeg unavailable: {0}")]
    Unavailable(String),
}

/// How the encoder child ended, as far as it could be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderExit {
    Success,
    Failed(Option<i32>),
    /// Still running, never started or the status could not be read
    Unknown,
}

/// A running encoder child.
pub trait EncoderProcess {
    /// Blocking write of one frame to the encoder's stdin.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), PipelineError>;
    /// Close stdin and report how the child ended.
    fn exit_status(&mut self) -> EncoderExit;
    /// Kill without grace period and reap.
    fn kill(&mut self);
}

/// Starts encoder children.
pub trait Launcher {
    type Process: EncoderProcess;

    /// Start a long-running streaming encoder with the given arguments.
    fn launch(&mut self, args: &[String]) -> Result<Self::Process, PipelineError>;

    /// Run a one-off encoder invocation to completion.
    fn run_to_completion(&mut self, args: &[String]) -> Result<(), PipelineError>;
}

/// Inputs the encoder command line is built from.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings<'a> {
    pub device: &'a str,
    pub chroma: &'a ChromaConfig,
    pub recording: Option<&'a RecordingRequest>,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Build the ffmpeg argument list for the given settings.
///
/// ```text
/// [-i <background>] [-t <len>] -i - -vcodec rawvideo -pix_fmt yuv420p
/// [-filter_complex <key graph>] -preset ultrafast -f v4l2 <device>
/// [-vf fps=<fps> <temp>] [-vf fps=<still fps> <path>-%02d.jpg]
/// ```
pub fn build_arguments(settings: &StreamSettings<'_>) -> Vec<String> {
    let mut args = settings.chroma.input_args();

    if let Some(rec) = settings.recording {
        args.extend(["-t".into(), rec.duration_seconds().to_string()]);
    }

    args.extend(
        ["-i", "-", "-vcodec", "rawvideo", "-pix_fmt", "yuv420p"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.extend(settings.chroma.filter_args());
    args.extend(
        ["-preset", "ultrafast", "-f", "v4l2", settings.device]
            .iter()
            .map(|s| s.to_string()),
    );

    if let Some(rec) = settings.recording {
        args.extend([
            "-vf".into(),
            format!("fps={}", rec.target_fps()),
            path_arg(rec.temp_path()),
        ]);
        if rec.still_frame_count() > 0 {
            args.extend([
                "-vf".into(),
                format!("fps={}", rec.still_fps()),
                path_arg(&rec.still_pattern()),
            ]);
        }
    }

    args
}

/// Owns the single encoder child.
pub struct StreamingPipeline<L: Launcher> {
    launcher: L,
    process: Option<L::Process>,
}

impl<L: Launcher> StreamingPipeline<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            process: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Kill the current encoder and start a new one.
    ///
    /// Returns whether the recording outputs were attached. They are dropped
    /// when the recording's files already exist. A spawn failure is logged and
    /// leaves the pipeline without a child, so the next write fails.
    pub fn restart(&mut self, settings: &StreamSettings<'_>) -> bool {
        if let Some(mut old) = self.process.take() {
            debug!("Ending previous encoder to start a new one");
            old.kill();
        }

        let mut settings = *settings;
        if let Some(rec) = settings.recording {
            if rec.artifacts_exist() {
                warn!(
                    path = %rec.final_path().display(),
                    "Video recording stopped: file or temp file already exist"
                );
                settings.recording = None;
            }
        }

        let args = build_arguments(&settings);
        info!(args = ?args, "Starting encoder");

        match self.launcher.launch(&args) {
            Ok(process) => {
                self.process = Some(process);
                settings.recording.is_some()
            }
            Err(e) => {
                error!("Failed to start encoder: {}", e);
                false
            }
        }
    }

    /// Forward one frame. Every error means the pipe is unusable.
    pub fn write(&mut self, frame: &[u8]) -> Result<(), PipelineError> {
        match self.process.as_mut() {
            Some(process) => process.write_frame(frame),
            None => Err(PipelineError::NotRunning),
        }
    }

    /// Collect the exit status of a child whose pipe broke.
    pub fn take_exit(&mut self) -> EncoderExit {
        match self.process.take() {
            Some(mut process) => {
                let exit = process.exit_status();
                // Reaps a child that had not exited yet
                process.kill();
                exit
            }
            None => EncoderExit::Unknown,
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            info!("Stopping encoder");
            process.kill();
        }
    }

    /// Key a still image against the configured background and replace it.
    ///
    /// The keyed result goes to `<path>-chroma.jpg` first and is then renamed
    /// over the original. A no-op when keying is inactive.
    pub fn chroma_key_image(
        &mut self,
        path: &Path,
        chroma: &ChromaConfig,
    ) -> Result<(), PipelineError> {
        chroma_key_image(&mut self.launcher, path, chroma)
    }
}

impl<L: Launcher> Drop for StreamingPipeline<L> {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
    }
}

/// Path of the intermediate keyed image.
pub fn keyed_image_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push("-chroma.jpg");
    PathBuf::from(s)
}

/// One-off keying argument list: background, photo, key graph, output.
pub fn chroma_key_arguments(path: &Path, chroma: &ChromaConfig) -> Vec<String> {
    let mut args = chroma.input_args();
    args.extend(["-i".into(), path_arg(path)]);
    args.extend(chroma.filter_args());
    args.extend(["-y".into(), path_arg(&keyed_image_path(path))]);
    args
}

pub fn chroma_key_image<L: Launcher>(
    launcher: &mut L,
    path: &Path,
    chroma: &ChromaConfig,
) -> Result<(), PipelineError> {
    if !chroma.active() {
        return Ok(());
    }
    let keyed = keyed_image_path(path);
    let args = chroma_key_arguments(path, chroma);
    info!(image = %path.display(), "Chroma keying image");

    if let Err(e) = launcher.run_to_completion(&args) {
        let _ = std::fs::remove_file(&keyed);
        return Err(e);
    }

    std::fs::rename(&keyed, path).map_err(|source| PipelineError::Replace {
        path: path.to_path_buf(),
        source,
    })
}
