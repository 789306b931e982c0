//! Keeps the capture source, the encoder and the daemon state consistent.
//!
//! All recovery actions live here: reconnecting the camera, resolving a
//! broken encoder pipe, pausing and resuming capture. The control handler
//! (`ipc::handlers`) and the daemon loop only call into this type.

use chrono::{DateTime, Local};
use std::path::Path;
use tracing::{info, warn};

use crate::capture::{CaptureAdapter, CaptureError, CaptureSource};
use crate::encoder::{Launcher, PipelineError, StreamingPipeline};
use crate::error::ServiceError;
use crate::recording::PipeResolution;
use crate::state::{DaemonState, DEADLINE_FORMAT};

/// Result of one capture-and-forward step.
#[derive(Debug)]
pub enum FrameOutcome {
    Forwarded,
    CaptureFault(CaptureError),
    PipeBroken(PipelineError),
}

pub struct Supervisor<S: CaptureSource, L: Launcher> {
    pub(crate) state: DaemonState,
    pub(crate) capture: CaptureAdapter<S>,
    pub(crate) pipeline: StreamingPipeline<L>,
}

impl<S: CaptureSource, L: Launcher> Supervisor<S, L> {
    pub fn new(state: DaemonState, capture: CaptureAdapter<S>, pipeline: StreamingPipeline<L>) -> Self {
        Self {
            state,
            capture,
            pipeline,
        }
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn capture(&self) -> &CaptureAdapter<S> {
        &self.capture
    }

    pub fn pipeline(&self) -> &StreamingPipeline<L> {
        &self.pipeline
    }

    /// (Re)connect the camera with the current overrides.
    pub fn connect(&mut self) -> bool {
        self.capture.reconnect(self.state.config_overrides.as_deref())
    }

    /// Restart the encoder from the current state and move a pending
    /// recording along.
    pub fn restart_pipeline(&mut self) {
        let attached = self.pipeline.restart(&self.state.stream_settings());
        self.state.recording.on_restart(attached);
    }

    /// Pull one frame and write it to the encoder.
    pub fn forward_frame(&mut self) -> FrameOutcome {
        let frame = match self.capture.capture_frame() {
            Ok(frame) => frame,
            Err(e) => return FrameOutcome::CaptureFault(e),
        };
        match self.pipeline.write(&frame) {
            Ok(()) => FrameOutcome::Forwarded,
            Err(e) => FrameOutcome::PipeBroken(e),
        }
    }

    /// Handle a broken encoder pipe: finalize or abandon the recording,
    /// reconnect the camera when needed, start a fresh encoder.
    pub fn recover_broken_pipe(&mut self, cause: &PipelineError) -> PipeResolution {
        warn!("Broken pipe ({}), checking if video recording finished", cause);
        let exit = self.pipeline.take_exit();
        let resolution = self.state.recording.resolve_broken_pipe(exit);

        if resolution.needs_reconnect() {
            info!("Restarting camera connection");
            self.connect();
        }

        self.restart_pipeline();
        resolution
    }

    /// Stop streaming and release the camera. Clears the auto-stop deadline.
    pub fn disable_capture(&mut self) {
        self.state.auto_stop_deadline = None;
        self.state.capturing = false;
        self.capture.stop();
        info!("Video disabled");
    }

    /// Resume streaming; the camera is reconnected first.
    pub fn enable_capture(&mut self) {
        self.state.capturing = true;
        self.connect();
    }

    /// Disable capture once the auto-stop deadline has passed.
    pub fn check_auto_stop(&mut self, now: DateTime<Local>) -> bool {
        if !self.state.auto_stop_due(now) {
            return false;
        }
        if let Some(deadline) = self.state.auto_stop_deadline {
            info!(
                "Camera stopped because of auto-stop time {}",
                deadline.format(DEADLINE_FORMAT)
            );
        }
        self.disable_capture();
        true
    }

    /// Capture a full-resolution still, keyed when chroma is active.
    pub fn capture_image(&mut self, path: &Path) -> Result<(), ServiceError> {
        self.capture.capture_still(path)?;
        if self.state.chroma.active() {
            self.pipeline.chroma_key_image(path, &self.state.chroma)?;
        }
        info!(path = %path.display(), "Image captured");
        Ok(())
    }

    /// Release every resource. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.state.capturing = false;
        self.state.auto_stop_deadline = None;
        self.capture.stop();
        self.pipeline.shutdown();
        info!("Closed camera connection");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::capture::mock::MockSource;
    use crate::encoder::mock::MockLauncher;
    use chrono::TimeZone;
    use clap::Parser;
    use picam_common::ControlArgs;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ControlArgs,
    }

    pub fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    pub fn args(argv: &[&str]) -> ControlArgs {
        let mut full = vec!["picamctl"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    /// Supervisor after bootstrap with mock collaborators.
    pub fn supervisor(
        argv: &[&str],
        launcher: MockLauncher,
    ) -> Supervisor<MockSource, MockLauncher> {
        let state = DaemonState::from_args(&args(argv), noon());
        let mut sup = Supervisor::new(
            state,
            CaptureAdapter::new(MockSource::default()),
            StreamingPipeline::new(launcher),
        );
        sup.connect();
        sup.restart_pipeline();
        sup
    }
}
