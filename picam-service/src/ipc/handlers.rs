//! Control message handling.
//!
//! One message is applied in a fixed order: exit, chroma, recording,
//! auto-stop timeout, config overrides, device. The encoder is restarted at
//! most once per message, and only when something it depends on changed.
//! The message then either takes an image or toggles capture.

use chrono::{DateTime, Local};
use picam_common::ipc::{ControlMessage, Reply};
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureSource;
use crate::chroma::{ChromaConfig, ChromaInput};
use crate::encoder::Launcher;
use crate::recording::RecordingRequest;
use crate::state::normalize_overrides;
use crate::supervisor::Supervisor;

/// What the daemon loop does after a message was handled.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub reply: Reply,
    /// Shut down after the reply went out
    pub exit: bool,
    /// The encoder was restarted while handling the message
    pub restarted: bool,
}

impl<S: CaptureSource, L: Launcher> Supervisor<S, L> {
    /// Apply a control message and produce its single reply.
    pub fn handle_message(&mut self, msg: &ControlMessage, now: DateTime<Local>) -> HandlerOutcome {
        debug!("Handling request: {:?}", msg);

        if msg.exit {
            info!("Exit requested by client");
            return HandlerOutcome {
                reply: Reply::exiting(),
                exit: true,
                restarted: false,
            };
        }

        let mut needs_restart = self.apply_chroma(msg);
        needs_restart |= self.apply_recording(msg);
        if let Some(minutes) = msg.single_shot_timeout_minutes {
            self.state.set_auto_stop(minutes, now);
        }
        needs_restart |= self.apply_config_overrides(msg);
        needs_restart |= self.apply_device(msg);

        if needs_restart {
            self.restart_pipeline();
        }

        self.state.single_shot = msg.single_shot;
        let reply = match &msg.image_path {
            Some(path) => self.handle_image(path),
            None => self.handle_capture_toggle(msg.suppress_restart),
        };

        HandlerOutcome {
            reply,
            exit: false,
            restarted: needs_restart,
        }
    }

    fn apply_chroma(&mut self, msg: &ControlMessage) -> bool {
        let (chroma, changed) = ChromaConfig::merge(&self.state.chroma, &ChromaInput::from(msg));
        if changed {
            info!(
                active = chroma.active(),
                color = chroma.key_color(),
                sensitivity = chroma.sensitivity(),
                blend = chroma.blend(),
                "Chroma keying changed"
            );
            self.state.chroma = chroma;
        }
        changed
    }

    fn apply_recording(&mut self, msg: &ControlMessage) -> bool {
        let Some(request) = RecordingRequest::from_message(msg) else {
            return false;
        };
        match request.and_then(|r| self.state.recording.request(r)) {
            Ok(()) => {}
            Err(e) => warn!("Video recording not started: {}", e),
        }
        // A rejected request still restarts: an aborted recording must not
        // keep writing to its old outputs.
        true
    }

    fn apply_config_overrides(&mut self, msg: &ControlMessage) -> bool {
        let Some(entries) = &msg.config else {
            return false;
        };
        let next = normalize_overrides(entries);
        if next == self.state.config_overrides {
            return false;
        }
        self.state.config_overrides = next;
        // A paused camera picks the new settings up when it resumes
        if self.state.capturing {
            self.connect();
        }
        true
    }

    fn apply_device(&mut self, msg: &ControlMessage) -> bool {
        match &msg.device {
            Some(device) if *device != self.state.device => {
                info!(from = %self.state.device, to = %device, "Output device changed");
                self.state.device = device.clone();
                true
            }
            _ => false,
        }
    }

    fn handle_image(&mut self, path: &Path) -> Reply {
        match self.capture_image(path) {
            Ok(()) => {
                if self.state.single_shot {
                    self.disable_capture();
                }
                Reply::image_captured()
            }
            Err(e) => {
                error!(path = %path.display(), "Image capture failed: {}", e);
                Reply::failure()
            }
        }
    }

    fn handle_capture_toggle(&mut self, suppress_restart: bool) -> Reply {
        if self.state.capturing {
            return Reply::video_already_running();
        }
        if suppress_restart {
            info!("Config updated, capture stays paused");
            return Reply::video_suppressed();
        }
        info!("Starting video");
        self.enable_capture();
        Reply::video_started()
    }
}

#[cfg(test)]
mod tests {
    use crate::capture::mock::MockSource;
    use crate::encoder::mock::MockLauncher;
    use crate::recording::RecordingState;
    use crate::supervisor::testing::*;
    use crate::supervisor::Supervisor;
    use picam_common::ipc::{ControlMessage, Reply, ReplyStatus};

    fn message(argv: &[&str]) -> ControlMessage {
        ControlMessage::from(&args(argv))
    }

    fn launches(launcher: &MockLauncher) -> usize {
        launcher.log.borrow().launches.len()
    }

    fn bootstrapped(argv: &[&str]) -> (Supervisor<MockSource, MockLauncher>, MockLauncher) {
        let launcher = MockLauncher::default();
        let sup = supervisor(argv, launcher.clone());
        (sup, launcher)
    }

    #[test]
    fn unchanged_message_does_not_restart() {
        let (mut sup, launcher) = bootstrapped(&[]);
        let outcome = sup.handle_message(&message(&[]), noon());
        assert!(!outcome.restarted);
        assert_eq!(outcome.reply, Reply::video_already_running());
        assert_eq!(launches(&launcher), 1);
        assert_eq!(sup.capture().source().starts, 1);
    }

    #[test]
    fn exit_replies_without_touching_state() {
        let (mut sup, launcher) = bootstrapped(&[]);
        let outcome = sup.handle_message(&message(&["--exit", "--chromaSensitivity", "0.5"]), noon());
        assert!(outcome.exit);
        assert_eq!(outcome.reply.message, "Exiting service!");
        assert_eq!(sup.state().chroma.sensitivity(), 0.0);
        assert_eq!(launches(&launcher), 1);
    }

    #[test]
    fn blend_only_change_restarts() {
        let (mut sup, launcher) = bootstrapped(&[
            "--chromaImage",
            "/srv/bg.png",
            "--chromaSensitivity",
            "0.3",
        ]);
        let before = sup.state().chroma.clone();

        let outcome = sup.handle_message(&message(&["--chromaBlend", "0.2"]), noon());
        assert!(outcome.restarted);
        assert_eq!(launches(&launcher), 2);

        let after = &sup.state().chroma;
        assert_eq!(after.blend(), 0.2);
        assert_eq!(after.sensitivity(), before.sensitivity());
        assert_eq!(after.background_image(), before.background_image());
        assert_eq!(after.key_color(), before.key_color());
        assert!(launcher.log.borrow().launches[1]
            .iter()
            .any(|a| a.contains("colorkey=0xFFFFFF:0.3:0.2")));
    }

    #[test]
    fn out_of_range_sensitivity_disables_keying() {
        let (mut sup, _launcher) = bootstrapped(&[
            "--chromaImage",
            "/srv/bg.png",
            "--chromaSensitivity",
            "0.3",
        ]);
        sup.handle_message(&message(&["--chromaSensitivity", "1.5"]), noon());
        assert!(!sup.state().chroma.active());
        assert_eq!(sup.state().chroma.sensitivity(), 0.0);
    }

    #[test]
    fn recording_request_attaches_file_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        let (mut sup, launcher) = bootstrapped(&[]);

        let outcome = sup.handle_message(
            &message(&["-v", target.to_str().unwrap(), "--vlen", "5", "--vfps", "15"]),
            noon(),
        );
        assert!(outcome.restarted);
        assert!(matches!(sup.state().recording.state(), RecordingState::InProgress(_)));

        let log = launcher.log.borrow();
        let args = log.launches.last().unwrap().join(" ");
        assert!(args.contains("-t 5"));
        assert!(args.contains("-vf fps=15"));
        assert!(args.contains("clip.mp4.temp.mp4"));
    }

    #[test]
    fn conflicting_recording_streams_only() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        std::fs::write(&target, b"old").unwrap();
        let (mut sup, launcher) = bootstrapped(&[]);

        sup.handle_message(&message(&["-v", target.to_str().unwrap()]), noon());
        assert!(sup.state().recording.is_idle());
        let log = launcher.log.borrow();
        assert!(!log.launches.last().unwrap().contains(&"-t".to_string()));
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
    }

    #[test]
    fn config_change_reconnects_and_restarts() {
        let (mut sup, launcher) = bootstrapped(&[]);
        let outcome = sup.handle_message(&message(&["-s", "size=1920x1080"]), noon());
        assert!(outcome.restarted);
        assert_eq!(sup.capture().source().starts, 2);
        assert_eq!(
            sup.capture().settings().still_options,
            vec![("size".to_string(), "1920x1080".to_string())]
        );
        assert_eq!(launches(&launcher), 2);

        // Resending the same entries is not a change
        let outcome = sup.handle_message(&message(&["-s", "size=1920x1080"]), noon());
        assert!(!outcome.restarted);

        // An empty list clears the overrides
        let outcome = sup.handle_message(&message(&[]), noon());
        assert!(outcome.restarted);
        assert!(sup.state().config_overrides.is_none());
    }

    #[test]
    fn device_change_restarts() {
        let (mut sup, launcher) = bootstrapped(&[]);
        let outcome = sup.handle_message(&message(&["-d", "/dev/video3"]), noon());
        assert!(outcome.restarted);
        assert_eq!(sup.state().device, "/dev/video3");
        assert!(launcher.log.borrow().launches[1].contains(&"/dev/video3".to_string()));
        assert_eq!(sup.capture().source().starts, 1);
    }

    #[test]
    fn single_shot_image_pauses_capture() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shot.jpg");
        let (mut sup, _launcher) = bootstrapped(&[]);

        let outcome = sup.handle_message(&message(&["-c", image.to_str().unwrap(), "-b"]), noon());
        assert_eq!(outcome.reply, Reply::image_captured());
        assert!(image.exists());
        assert!(!sup.state().capturing);
        assert!(!sup.capture().is_started());
    }

    #[test]
    fn image_without_single_shot_keeps_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shot.jpg");
        let (mut sup, _launcher) = bootstrapped(&[]);

        let outcome = sup.handle_message(&message(&["-c", image.to_str().unwrap()]), noon());
        assert_eq!(outcome.reply.message, "Image captured");
        assert!(sup.state().capturing);
    }

    #[test]
    fn failed_image_replies_failure() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shot.jpg");
        let (mut sup, _launcher) = bootstrapped(&[]);
        sup.capture.source_mut().fail_still = true;

        let outcome = sup.handle_message(&message(&["-c", image.to_str().unwrap()]), noon());
        assert!(outcome.reply.is_failure());
        assert_eq!(outcome.reply.message, "failure");
    }

    #[test]
    fn paused_capture_resumes_unless_suppressed() {
        let (mut sup, _launcher) = bootstrapped(&[]);
        sup.disable_capture();

        let outcome = sup.handle_message(&message(&["--bsmx"]), noon());
        assert_eq!(outcome.reply.status, ReplyStatus::VideoSuppressed);
        assert!(!sup.state().capturing);

        let outcome = sup.handle_message(&message(&[]), noon());
        assert_eq!(outcome.reply.message, "Starting Video");
        assert!(sup.state().capturing);
        assert!(sup.capture().is_started());
    }

    #[test]
    fn timeout_sets_and_clears_deadline() {
        let (mut sup, _launcher) = bootstrapped(&[]);
        sup.handle_message(&message(&["--bsmtime", "10"]), noon());
        assert!(sup.state().auto_stop_deadline.is_some());
        sup.handle_message(&message(&[]), noon());
        assert!(sup.state().auto_stop_deadline.is_none());
    }
}
