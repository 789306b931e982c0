//! Command-line arguments shared by the daemon and the client.
//!
//! The same flags bootstrap a fresh daemon and, when a daemon is already
//! running, are forwarded to it as one [`ControlMessage`].

use clap::Args;
use std::path::PathBuf;

use crate::ipc::ControlMessage;

/// Default virtual output device
pub const DEFAULT_DEVICE: &str = "/dev/video0";

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ControlArgs {
    /// Virtual device the encoder stream is sent to
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Capture configuration entry KEY=VALUE (repeatable)
    #[arg(short = 's', long = "set-config", value_name = "KEY=VALUE")]
    pub config: Vec<String>,

    /// Capture an image to this path. Without a running daemon a single image
    /// is taken and the program exits. Chroma options apply.
    #[arg(short = 'c', long = "capture-image-and-download", value_name = "PATH")]
    pub image_path: Option<PathBuf>,

    /// Stop the preview after taking an image and wait for a message to start it again
    #[arg(short = 'b', long = "bsm")]
    pub single_shot: bool,

    /// With --bsm: do not restart the preview after this request
    #[arg(long = "bsmx")]
    pub suppress_restart: bool,

    /// Keep the preview active for this many minutes, 0 disables the timeout
    #[arg(long = "bsmtime", value_name = "MINUTES", default_value_t = 0)]
    pub single_shot_timeout_minutes: u32,

    /// Save the next part of the preview as a video file
    #[arg(short = 'v', long = "video", value_name = "PATH")]
    pub video_path: Option<PathBuf>,

    /// Number of stills extracted from the video at equidistant times
    #[arg(long = "vframes", default_value_t = 4)]
    pub video_frames: u32,

    /// Video duration in seconds
    #[arg(long = "vlen", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub video_length: u32,

    /// Video frame rate
    #[arg(long = "vfps", default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub video_fps: u32,

    /// Chroma key background image (full path)
    #[arg(long = "chromaImage", value_name = "PATH")]
    pub chroma_image: Option<PathBuf>,

    /// Chroma key color (color name or "0xFFFFFF" style)
    #[arg(long = "chromaColor", value_name = "COLOR")]
    pub chroma_color: Option<String>,

    /// Chroma key sensitivity (0.01 to 1.0, or 0.0 to disable)
    #[arg(long = "chromaSensitivity", value_name = "VALUE", allow_hyphen_values = true)]
    pub chroma_sensitivity: Option<f64>,

    /// Chroma key blend (0.0 to 1.0)
    #[arg(long = "chromaBlend", value_name = "VALUE", allow_hyphen_values = true)]
    pub chroma_blend: Option<f64>,

    /// Exit the running daemon
    #[arg(long)]
    pub exit: bool,
}

impl From<&ControlArgs> for ControlMessage {
    fn from(args: &ControlArgs) -> Self {
        // Device, config and timeout are always resent so the daemon can
        // replace its copy; recording parameters only ride along with a path.
        let recording = args.video_path.is_some();
        ControlMessage {
            device: Some(args.device.clone()),
            config: Some(args.config.clone()),
            image_path: args.image_path.clone(),
            single_shot: args.single_shot,
            suppress_restart: args.suppress_restart,
            single_shot_timeout_minutes: Some(args.single_shot_timeout_minutes),
            video_path: args.video_path.clone(),
            video_length: recording.then_some(args.video_length),
            video_frames: recording.then_some(args.video_frames),
            video_fps: recording.then_some(args.video_fps),
            chroma_image: args.chroma_image.clone(),
            chroma_color: args.chroma_color.clone(),
            chroma_sensitivity: args.chroma_sensitivity,
            chroma_blend: args.chroma_blend,
            exit: args.exit,
        }
    }
}
