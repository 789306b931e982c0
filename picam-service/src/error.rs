use picam_common::validation::ValidationError;
use thiserror::Error;

use crate::capture::CaptureError;
use crate::encoder::PipelineError;

/// Top-level daemon errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind control port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] ValidationError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to set up logging: {0}")]
    Logging(String),
}
