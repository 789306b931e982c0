//! picam camera daemon.
//!
//! Streams camera frames through ffmpeg into a v4l2 output device and takes
//! control requests from other `picamctl` invocations over TCP. The library
//! is shared by the `picam-service` binary and the `picamctl` client, which
//! runs the daemon in-process when no instance is running yet.

pub mod capture;
pub mod chroma;
pub mod config;
pub mod daemon;
pub mod encoder;
pub mod error;
pub mod ipc;
pub mod logging;
mod process;
pub mod recording;
pub mod shutdown;
pub mod state;
pub mod supervisor;

use chrono::Local;
use picam_common::ipc::ControlMessage;
use picam_common::ControlArgs;
use tracing::{info, warn};

use crate::capture::{CameraSettings, CaptureAdapter, CaptureSource, LibcameraSource};
use crate::chroma::{ChromaConfig, ChromaInput};
use crate::config::ServiceConfig;
use crate::daemon::{Daemon, LoopTiming};
use crate::encoder::{ensure_ffmpeg, resolve_ffmpeg_path, FfmpegLauncher, StreamingPipeline};
use crate::error::ServiceError;
use crate::ipc::ControlServer;
use crate::state::{normalize_overrides, DaemonState};
use crate::supervisor::Supervisor;

/// Run without a running daemon: a lone image request is a one-shot capture,
/// anything else starts the daemon.
///
/// Arguments are checked first; chroma values end up in the ffmpeg filter graph.
pub fn run(args: &ControlArgs, config: &ServiceConfig) -> Result<(), ServiceError> {
    ControlMessage::from(args).validate()?;

    if args.image_path.is_some() {
        run_one_shot(args, config)
    } else {
        run_daemon(args, config)
    }
}

/// Start the daemon and block until it shuts down.
pub fn run_daemon(args: &ControlArgs, config: &ServiceConfig) -> Result<(), ServiceError> {
    info!("picam daemon starting (pid: {})...", std::process::id());

    let ffmpeg = resolve_ffmpeg_path(config.ffmpeg_path.as_deref());
    match ensure_ffmpeg(&ffmpeg) {
        Ok(()) => info!(path = %ffmpeg.display(), "FFmpeg available"),
        // Frames cannot be encoded, but the control channel stays usable
        Err(e) => warn!("FFmpeg check failed: {}", e),
    }

    let server = ControlServer::bind(config.control_port).map_err(|source| ServiceError::Bind {
        port: config.control_port,
        source,
    })?;

    shutdown::setup_signal_handlers();

    let state = DaemonState::from_args(args, Local::now());
    let supervisor = Supervisor::new(
        state,
        CaptureAdapter::new(LibcameraSource::new(config.camera.clone())),
        StreamingPipeline::new(FfmpegLauncher::new(ffmpeg)),
    );
    let mut daemon = Daemon::new(
        supervisor,
        server,
        shutdown::get_shutdown_flag(),
        LoopTiming::from_config(config),
    );
    daemon.run();
    Ok(())
}

/// Capture a single still, keyed when chroma is configured, and return.
pub fn run_one_shot(args: &ControlArgs, config: &ServiceConfig) -> Result<(), ServiceError> {
    let Some(path) = args.image_path.as_deref() else {
        return Ok(());
    };
    let msg = ControlMessage::from(args);
    let (chroma, _) = ChromaConfig::merge(&ChromaConfig::default(), &ChromaInput::from(&msg));
    let settings = CameraSettings::from_overrides(normalize_overrides(&args.config).as_deref());

    let mut source = LibcameraSource::new(config.camera.clone());
    source.capture_still(path, &settings)?;

    if chroma.active() {
        let mut launcher =
            FfmpegLauncher::new(resolve_ffmpeg_path(config.ffmpeg_path.as_deref()));
        encoder::chroma_key_image(&mut launcher, path, &chroma)?;
    }
    info!(path = %path.display(), "Image captured");
    Ok(())
}
