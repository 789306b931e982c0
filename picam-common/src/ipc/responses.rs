//! Control reply sent back to the client.

use serde::{Deserialize, Serialize};

/// Reply text that clients must treat as a failed request.
pub const FAILURE_SENTINEL: &str = "failure";

/// Outcome category of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Exiting,
    ImageCaptured,
    VideoStarted,
    VideoAlreadyRunning,
    VideoSuppressed,
    Error,
}

/// Single reply to a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    /// Human readable line printed by the client
    pub message: String,
}

impl Reply {
    fn new(status: ReplyStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn exiting() -> Self {
        Self::new(ReplyStatus::Exiting, "Exiting service!")
    }

    pub fn image_captured() -> Self {
        Self::new(ReplyStatus::ImageCaptured, "Image captured")
    }

    pub fn video_started() -> Self {
        Self::new(ReplyStatus::VideoStarted, "Starting Video")
    }

    pub fn video_already_running() -> Self {
        Self::new(ReplyStatus::VideoAlreadyRunning, "Video already running")
    }

    pub fn video_suppressed() -> Self {
        Self::new(
            ReplyStatus::VideoSuppressed,
            "Updated config. Video not starting because of option --bsmx",
        )
    }

    /// Generic failure carrying the sentinel text.
    pub fn failure() -> Self {
        Self::new(ReplyStatus::Error, FAILURE_SENTINEL)
    }

    /// Error with a specific message (message is sanitized - no internal details).
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ReplyStatus::Error, message)
    }

    /// Whether the client should exit with a failure code.
    pub fn is_failure(&self) -> bool {
        self.status == ReplyStatus::Error || self.message == FAILURE_SENTINEL
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
