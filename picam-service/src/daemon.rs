//! The daemon loop.
//!
//! Single-threaded and cooperative: each step polls the control channel,
//! checks the auto-stop deadline and forwards at most one frame. A message is
//! handled to completion, encoder restart included, before the next frame.
//! Capture faults and broken encoder pipes are recovered here; only the
//! shutdown path ends the loop.

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::capture::CaptureSource;
use crate::config::ServiceConfig;
use crate::encoder::Launcher;
use crate::ipc::ControlChannel;
use crate::supervisor::{FrameOutcome, Supervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Capturing is on but the camera is not connected
    Connecting,
    Streaming,
    /// Capturing is off, only the control channel is served
    Paused,
    Shutdown,
}

/// Sleep durations of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    /// Between polls while paused
    pub idle: Duration,
    /// Before reconnecting a failed camera or encoder
    pub backoff: Duration,
}

impl LoopTiming {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            idle: config.idle_interval(),
            backoff: config.reconnect_backoff(),
        }
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

pub struct Daemon<S: CaptureSource, L: Launcher, C: ControlChannel> {
    supervisor: Supervisor<S, L>,
    channel: C,
    shutdown_flag: Arc<AtomicBool>,
    timing: LoopTiming,
    stopped: bool,
}

impl<S: CaptureSource, L: Launcher, C: ControlChannel> Daemon<S, L, C> {
    pub fn new(
        supervisor: Supervisor<S, L>,
        channel: C,
        shutdown_flag: Arc<AtomicBool>,
        timing: LoopTiming,
    ) -> Self {
        Self {
            supervisor,
            channel,
            shutdown_flag,
            timing,
            stopped: false,
        }
    }

    pub fn supervisor(&self) -> &Supervisor<S, L> {
        &self.supervisor
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn phase(&self) -> Phase {
        if self.stopped {
            Phase::Shutdown
        } else if !self.supervisor.state().capturing {
            Phase::Paused
        } else if !self.supervisor.capture().is_started() {
            Phase::Connecting
        } else {
            Phase::Streaming
        }
    }

    /// Connect the camera and start the first encoder.
    pub fn bootstrap(&mut self) {
        if self.supervisor.state().capturing {
            self.supervisor.connect();
        }
        self.supervisor.restart_pipeline();
    }

    /// Run one loop iteration. Returns `false` once the daemon has shut down.
    pub fn step(&mut self, now: DateTime<Local>) -> bool {
        if self.stopped {
            return false;
        }

        if self.shutdown_flag.load(Ordering::SeqCst) {
            info!("Shutdown flag set, stopping daemon");
            self.shutdown();
            return false;
        }

        if let Some(msg) = self.channel.poll_request() {
            let outcome = self.supervisor.handle_message(&msg, now);
            info!(reply = %outcome.reply, "Replying to client");
            self.channel.reply(&outcome.reply);
            if outcome.exit {
                self.shutdown();
                return false;
            }
        }

        self.supervisor.check_auto_stop(now);

        if !self.supervisor.state().capturing {
            std::thread::sleep(self.timing.idle);
            return true;
        }

        match self.supervisor.forward_frame() {
            FrameOutcome::Forwarded => {}
            FrameOutcome::CaptureFault(e) => {
                warn!("Camera fault: {}, reconnecting", e);
                std::thread::sleep(self.timing.backoff);
                self.supervisor.connect();
            }
            FrameOutcome::PipeBroken(e) => {
                self.supervisor.recover_broken_pipe(&e);
                if !self.supervisor.pipeline().is_running() {
                    // Encoder could not be started, do not spin on it
                    std::thread::sleep(self.timing.backoff);
                }
            }
        }
        true
    }

    /// Bootstrap, then step until shutdown.
    pub fn run(&mut self) {
        self.bootstrap();
        info!("Daemon running");
        while self.step(Local::now()) {}
        info!("Daemon stopped");
    }

    /// Stop capturing, release the camera and kill the encoder.
    ///
    /// Runs at most once; later calls return `false`.
    pub fn shutdown(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        info!("Shutting down");
        self.supervisor.shutdown();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::MockSource;
    use crate::capture::CaptureError;
    use crate::encoder::mock::MockLauncher;
    use crate::ipc::server::mock::MockChannel;
    use crate::supervisor::testing::*;
    use picam_common::ipc::ControlMessage;

    type TestDaemon = Daemon<MockSource, MockLauncher, MockChannel>;

    fn timing() -> LoopTiming {
        LoopTiming {
            idle: Duration::ZERO,
            backoff: Duration::ZERO,
        }
    }

    fn daemon(argv: &[&str], launcher: MockLauncher) -> (TestDaemon, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let state = crate::state::DaemonState::from_args(&args(argv), noon());
        let sup = Supervisor::new(
            state,
            crate::capture::CaptureAdapter::new(MockSource::default()),
            crate::encoder::StreamingPipeline::new(launcher),
        );
        let mut daemon = Daemon::new(sup, MockChannel::default(), flag.clone(), timing());
        daemon.bootstrap();
        (daemon, flag)
    }

    #[test]
    fn bootstrap_streams() {
        let launcher = MockLauncher::default();
        let log = launcher.log.clone();
        let (mut daemon, _) = daemon(&[], launcher);
        assert_eq!(daemon.phase(), Phase::Streaming);
        assert!(daemon.step(noon()));
        assert!(daemon.step(noon()));
        assert_eq!(log.borrow().frames, 2);
    }

    #[test]
    fn two_exit_messages_shut_down_once() {
        let launcher = MockLauncher::default();
        let log = launcher.log.clone();
        let (mut daemon, _) = daemon(&[], launcher);
        daemon.channel_mut().requests.push_back(ControlMessage::exit());
        daemon.channel_mut().requests.push_back(ControlMessage::exit());

        assert!(!daemon.step(noon()));
        assert!(!daemon.step(noon()));
        assert_eq!(daemon.phase(), Phase::Shutdown);
        assert_eq!(daemon.channel().replies.len(), 1);
        assert_eq!(daemon.channel().replies[0].message, "Exiting service!");
        assert_eq!(log.borrow().kills, 1);
        assert!(!daemon.shutdown());
    }

    #[test]
    fn signal_then_message_shuts_down_once() {
        let launcher = MockLauncher::default();
        let log = launcher.log.clone();
        let (mut daemon, flag) = daemon(&[], launcher);
        flag.store(true, Ordering::SeqCst);
        daemon.channel_mut().requests.push_back(ControlMessage::exit());

        assert!(!daemon.step(noon()));
        assert!(!daemon.step(noon()));
        assert!(daemon.channel().replies.is_empty());
        assert_eq!(daemon.supervisor().capture().source().stops, 1);
        assert_eq!(log.borrow().kills, 1);
    }

    #[test]
    fn finished_recording_is_finalized_in_loop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        let launcher = MockLauncher {
            frames_before_break: Some(1),
            ..MockLauncher::default()
        };
        let (mut daemon, _) = daemon(&["-v", target.to_str().unwrap()], launcher);
        std::fs::write(dir.path().join("clip.mp4.temp.mp4"), b"video").unwrap();

        assert!(daemon.step(noon()));
        assert!(daemon.step(noon()));
        assert!(target.exists());
        assert_eq!(daemon.supervisor().capture().source().starts, 1);
        assert!(daemon.supervisor().state().recording.is_idle());
    }

    #[test]
    fn crashed_encoder_reconnects_camera() {
        let launcher = MockLauncher {
            frames_before_break: Some(0),
            ..MockLauncher::default()
        };
        let log = launcher.log.clone();
        let (mut daemon, _) = daemon(&[], launcher);

        assert!(daemon.step(noon()));
        assert_eq!(daemon.supervisor().capture().source().starts, 2);
        assert_eq!(log.borrow().launches.len(), 2);
    }

    #[test]
    fn capture_fault_reconnects() {
        let (mut daemon, _) = daemon(&[], MockLauncher::default());
        daemon
            .supervisor
            .capture
            .source_mut()
            .frames
            .push_back(Err(CaptureError::StreamEnded));

        assert!(daemon.step(noon()));
        assert_eq!(daemon.supervisor().capture().source().starts, 2);
        assert_eq!(daemon.phase(), Phase::Streaming);
    }

    #[test]
    fn failed_reconnect_stays_connecting() {
        let (mut daemon, _) = daemon(&[], MockLauncher::default());
        let source = daemon.supervisor.capture.source_mut();
        source.frames.push_back(Err(CaptureError::StreamEnded));
        source.fail_start = true;

        assert!(daemon.step(noon()));
        assert_eq!(daemon.phase(), Phase::Connecting);
        // Not started: the next step faults and retries again
        assert!(daemon.step(noon()));
        assert_eq!(daemon.supervisor().capture().source().starts, 3);
    }

    #[test]
    fn auto_stop_pauses_loop() {
        let launcher = MockLauncher::default();
        let log = launcher.log.clone();
        let (mut daemon, _) = daemon(&["--bsmtime", "1"], launcher);

        assert!(daemon.step(noon() + chrono::Duration::minutes(5)));
        assert_eq!(daemon.phase(), Phase::Paused);
        assert_eq!(log.borrow().frames, 0);

        // A plain message resumes capture
        daemon
            .channel_mut()
            .requests
            .push_back(ControlMessage::from(&args(&[])));
        assert!(daemon.step(noon() + chrono::Duration::minutes(6)));
        assert_eq!(daemon.phase(), Phase::Streaming);
        assert_eq!(daemon.channel().replies[0].message, "Starting Video");
    }

    #[test]
    fn spawn_failure_is_retried_after_backoff() {
        let launcher = MockLauncher {
            fail_launch: true,
            ..MockLauncher::default()
        };
        let log = launcher.log.clone();
        let (mut daemon, _) = daemon(&[], launcher);
        assert!(!daemon.supervisor().pipeline().is_running());

        assert!(daemon.step(noon()));
        assert_eq!(log.borrow().launches.len(), 2);
        assert!(daemon.step(noon()));
        assert_eq!(log.borrow().launches.len(), 3);
    }
}
