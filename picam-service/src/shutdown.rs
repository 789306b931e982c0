//! Process-wide shutdown flag and signal handling.
//!
//! Signal handlers only flip the flag; the daemon loop polls it between
//! steps and runs the actual shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Global shutdown flag
static SHUTDOWN_FLAG: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();

/// Get the global shutdown flag.
pub fn get_shutdown_flag() -> Arc<AtomicBool> {
    SHUTDOWN_FLAG
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

/// Request daemon shutdown.
pub fn request_shutdown() {
    info!("Shutdown requested");
    get_shutdown_flag().store(true, Ordering::SeqCst);
}

/// Set up SIGTERM/SIGINT/SIGHUP handlers for graceful shutdown.
pub fn setup_signal_handlers() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let spawned = std::thread::Builder::new()
            .name("signals".into())
            .spawn(|| {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create signal runtime: {}", e);
                        return;
                    }
                };
                rt.block_on(async {
                    let streams = (
                        signal(SignalKind::terminate()),
                        signal(SignalKind::interrupt()),
                        signal(SignalKind::hangup()),
                    );
                    let (mut sigterm, mut sigint, mut sighup) = match streams {
                        (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
                        _ => {
                            error!("Failed to register signal handlers");
                            return;
                        }
                    };

                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM");
                        }
                        _ = sigint.recv() => {
                            info!("Received SIGINT");
                        }
                        _ = sighup.recv() => {
                            info!("Received SIGHUP");
                        }
                    }

                    request_shutdown();
                });
            });

        if let Err(e) = spawned {
            error!("Failed to spawn signal thread: {}", e);
        }
    }
}
