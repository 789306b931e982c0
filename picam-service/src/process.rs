//! Child process helpers shared by the encoder and the camera backend.

use std::io::{BufRead, BufReader, Read};
use std::process::Child;
use std::time::Duration;
use tracing::{debug, warn};
#[cfg(unix)]
use wait_timeout::ChildExt;

/// Spawn a thread that forwards a child's stderr lines to the debug log.
pub fn forward_stderr<R: Read + Send + 'static>(label: &'static str, stderr: R) {
    let spawned = std::thread::Builder::new()
        .name(format!("{label}-stderr"))
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                debug!(target: "picam_service::child", "[{}] {}", label, line);
            }
            debug!("[{}] stderr reader thread exiting", label);
        });
    if let Err(e) = spawned {
        warn!("Failed to spawn stderr reader for {}: {}", label, e);
    }
}

/// Kill the child immediately and reap it.
pub fn kill_and_reap(child: &mut Child) {
    // Fails only when the child already exited
    let _ = child.kill();
    if let Err(e) = child.wait() {
        warn!("Failed to reap child {}: {}", child.id(), e);
    }
}

/// Ask the child to stop with SIGINT, falling back to a kill after `grace`.
///
/// The camera apps only release the sensor cleanly on SIGINT.
pub fn interrupt_and_reap(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
            unsafe {
                libc::kill(pid, libc::SIGINT);
            }
            match child.wait_timeout(grace) {
                Ok(Some(_)) => return,
                Ok(None) => debug!("Child {} ignored SIGINT, killing", pid),
                Err(e) => warn!("Failed to wait for child {}: {}", pid, e),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    kill_and_reap(child);
}
