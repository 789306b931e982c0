//! Daemon state.
//!
//! One owned struct holds everything the control handler and the loop
//! mutate. It is created from the bootstrap arguments and lives for the
//! whole process; it is only ever passed around by `&mut`.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use picam_common::ControlArgs;
use picam_common::ipc::ControlMessage;
use tracing::{info, warn};

use crate::chroma::{ChromaConfig, ChromaInput};
use crate::encoder::StreamSettings;
use crate::recording::{RecordingRequest, RecordingTracker};

/// Format used when logging the auto-stop deadline
pub const DEADLINE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug)]
pub struct DaemonState {
    /// Frames are being pulled and forwarded
    pub capturing: bool,
    /// Virtual output device of the encoder
    pub device: String,
    /// Raw `KEY=VALUE` capture entries, `None` when unset
    pub config_overrides: Option<Vec<String>>,
    pub chroma: ChromaConfig,
    pub recording: RecordingTracker,
    pub auto_stop_deadline: Option<DateTime<Local>>,
    /// Stop capturing after the next image request
    pub single_shot: bool,
}

/// Empty override lists mean "unset".
pub fn normalize_overrides(entries: &[String]) -> Option<Vec<String>> {
    if entries.is_empty() {
        None
    } else {
        Some(entries.to_vec())
    }
}

impl DaemonState {
    /// Initial state from command-line arguments.
    pub fn from_args(args: &ControlArgs, now: DateTime<Local>) -> Self {
        let msg = ControlMessage::from(args);
        let (chroma, _) = ChromaConfig::merge(&ChromaConfig::default(), &ChromaInput::from(&msg));
        info!(active = chroma.active(), "Chroma keying configured");

        let mut state = Self {
            capturing: true,
            device: args.device.clone(),
            config_overrides: normalize_overrides(&args.config),
            chroma,
            recording: RecordingTracker::new(),
            auto_stop_deadline: None,
            single_shot: args.single_shot,
        };
        state.set_auto_stop(args.single_shot_timeout_minutes, now);

        if let Some(request) = RecordingRequest::from_message(&msg) {
            match request.and_then(|r| state.recording.request(r)) {
                Ok(()) => {}
                Err(e) => warn!("Recording not started: {}", e),
            }
        }
        state
    }

    /// `minutes > 0` sets the deadline to now + minutes, 0 clears it.
    pub fn set_auto_stop(&mut self, minutes: u32, now: DateTime<Local>) {
        if minutes == 0 {
            self.auto_stop_deadline = None;
            return;
        }
        let deadline = now + ChronoDuration::minutes(i64::from(minutes));
        info!(
            "Set auto-stop time to {}",
            deadline.format(DEADLINE_FORMAT)
        );
        self.auto_stop_deadline = Some(deadline);
    }

    pub fn auto_stop_due(&self, now: DateTime<Local>) -> bool {
        self.auto_stop_deadline
            .map(|deadline| now > deadline)
            .unwrap_or(false)
    }

    /// Current encoder inputs, including a recording waiting to start.
    pub fn stream_settings(&self) -> StreamSettings<'_> {
        StreamSettings {
            device: &self.device,
            chroma: &self.chroma,
            recording: self.recording.pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ControlArgs,
    }

    fn args(argv: &[&str]) -> ControlArgs {
        let mut full = vec!["picam-service"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn bootstrap_defaults() {
        let state = DaemonState::from_args(&args(&[]), noon());
        assert!(state.capturing);
        assert_eq!(state.device, "/dev/video0");
        assert!(state.config_overrides.is_none());
        assert!(!state.chroma.active());
        assert!(state.auto_stop_deadline.is_none());
        assert!(state.recording.is_idle());
    }

    #[test]
    fn bootstrap_with_chroma_and_timeout() {
        let state = DaemonState::from_args(
            &args(&[
                "--chromaImage",
                "/srv/bg.png",
                "--chromaSensitivity",
                "0.4",
                "--bsmtime",
                "5",
                "-s",
                "size=640x480",
            ]),
            noon(),
        );
        assert!(state.chroma.active());
        assert_eq!(state.config_overrides, Some(vec!["size=640x480".to_string()]));
        assert_eq!(
            state.auto_stop_deadline,
            Some(Local.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap())
        );
    }

    #[test]
    fn bootstrap_with_video_requests_recording() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        let state = DaemonState::from_args(&args(&["-v", target.to_str().unwrap()]), noon());
        let pending = state.stream_settings().recording.cloned();
        assert_eq!(pending.map(|r| r.final_path().to_path_buf()), Some(target));
    }

    #[test]
    fn auto_stop_due_after_deadline() {
        let mut state = DaemonState::from_args(&args(&[]), noon());
        state.set_auto_stop(1, noon());
        assert!(!state.auto_stop_due(noon()));
        assert!(!state.auto_stop_due(noon() + ChronoDuration::seconds(60)));
        assert!(state.auto_stop_due(noon() + ChronoDuration::seconds(61)));

        state.set_auto_stop(0, noon());
        assert!(!state.auto_stop_due(noon() + ChronoDuration::days(1)));
    }
}
