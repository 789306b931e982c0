//! ffmpeg child processes.

use ffmpeg_sidecar::command::FfmpegCommand;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use super::{EncoderExit, EncoderProcess, Launcher, PipelineError};
use crate::process::{forward_stderr, kill_and_reap};

/// How long a child whose pipe broke gets to report its exit status
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// Resolve the ffmpeg binary: configured path, then PATH, then plain `ffmpeg`.
pub fn resolve_ffmpeg_path(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    which::which("ffmpeg").unwrap_or_else(|_| PathBuf::from("ffmpeg"))
}

/// Verify the binary is accessible by running `ffmpeg -version`.
pub fn ensure_ffmpeg(ffmpeg: &Path) -> Result<(), PipelineError> {
    debug!("Resolved ffmpeg path: {}", ffmpeg.display());
    match Command::new(ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(PipelineError::Unavailable(format!(
            "{} -version exited with status: {}",
            ffmpeg.display(),
            status
        ))),
        Err(e) => Err(PipelineError::Unavailable(format!(
            "{} not found: {}",
            ffmpeg.display(),
            e
        ))),
    }
}

/// Launches ffmpeg children.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    fn command(&self, args: &[String]) -> FfmpegCommand {
        let mut command = FfmpegCommand::new_with_path(&self.ffmpeg);
        command.args(args);
        command
    }
}

impl Launcher for FfmpegLauncher {
    type Process = FfmpegProcess;

    fn launch(&mut self, args: &[String]) -> Result<FfmpegProcess, PipelineError> {
        let mut command = self.command(args);

        // Get the inner command and configure stdin
        let inner_command = command.as_inner_mut();
        inner_command.stdin(Stdio::piped());
        inner_command.stdout(Stdio::null());
        inner_command.stderr(Stdio::piped());

        let mut child = inner_command.spawn().map_err(PipelineError::Spawn)?;

        let Some(stdin) = child.stdin.take() else {
            kill_and_reap(&mut child);
            return Err(PipelineError::NoStdin);
        };

        if let Some(stderr) = child.stderr.take() {
            forward_stderr("ffmpeg", stderr);
        }

        info!(pid = child.id(), "Encoder started");
        Ok(FfmpegProcess {
            child,
            stdin: Some(stdin),
            reaped: false,
        })
    }

    fn run_to_completion(&mut self, args: &[String]) -> Result<(), PipelineError> {
        let mut command = self.command(args);
        let inner_command = command.as_inner_mut();
        inner_command.stdin(Stdio::null());
        inner_command.stdout(Stdio::null());
        inner_command.stderr(Stdio::piped());

        let mut child = inner_command.spawn().map_err(PipelineError::Spawn)?;

        // Read stderr for error messages
        let stderr_output = if let Some(mut stderr) = child.stderr.take() {
            let mut output = String::new();
            let _ = stderr.read_to_string(&mut output);
            output
        } else {
            String::new()
        };

        let status = child.wait().map_err(PipelineError::Spawn)?;
        if !status.success() {
            warn!(
                "ffmpeg failed: {}",
                stderr_output.lines().last().unwrap_or(&stderr_output)
            );
            return Err(PipelineError::ExitStatus(status.code()));
        }
        Ok(())
    }
}

/// A running streaming encoder.
pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    reaped: bool,
}

impl EncoderProcess for FfmpegProcess {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), PipelineError> {
        let stdin = self.stdin.as_mut().ok_or(PipelineError::NoStdin)?;
        stdin.write_all(frame).map_err(PipelineError::BrokenPipe)
    }

    fn exit_status(&mut self) -> EncoderExit {
        // Close stdin to signal end of input
        drop(self.stdin.take());
        match self.child.wait_timeout(EXIT_WAIT) {
            Ok(Some(status)) => {
                self.reaped = true;
                if status.success() {
                    EncoderExit::Success
                } else {
                    EncoderExit::Failed(status.code())
                }
            }
            Ok(None) => EncoderExit::Unknown,
            Err(e) => {
                warn!("Failed to read encoder exit status: {}", e);
                EncoderExit::Unknown
            }
        }
    }

    fn kill(&mut self) {
        drop(self.stdin.take());
        if !self.reaped {
            kill_and_reap(&mut self.child);
            self.reaped = true;
        }
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
