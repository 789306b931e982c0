//! Tracing setup for the daemon.
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`). With file
//! logging enabled a daily rolling file is written to the log directory as
//! well; the returned guard has to live until the process exits.

use picam_common::logging::{ensure_log_dir, SERVICE_LOG_PREFIX};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::ServiceError;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn file_appender() -> Result<RollingFileAppender, ServiceError> {
    let dir = ensure_log_dir().map_err(|e| ServiceError::Logging(e.to_string()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(SERVICE_LOG_PREFIX)
        .build(dir)
        .map_err(|e| ServiceError::Logging(e.to_string()))
}

/// Install the global subscriber.
///
/// A log file that cannot be opened is reported on stderr and the daemon
/// continues with stderr logging only.
pub fn init_tracing(file_logging: bool) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let file = if file_logging {
        match file_appender() {
            Ok(appender) => Some(tracing_appender::non_blocking(appender)),
            Err(e) => {
                eprintln!("Warning: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        ),
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {}", e);
    }
    guard
}
