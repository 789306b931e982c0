//! Detection of an already running daemon instance.
//!
//! The control port is only bound by a daemon, but a client must decide
//! whether to act as client or become the daemon itself before touching the
//! network. The decision is made by inspecting the process table.

use std::path::{Path, PathBuf};

/// Executable names that may host the daemon.
pub const DAEMON_EXECUTABLES: &[&str] = &["picamctl", "picam-service"];

/// A running process that looks like another daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstance {
    pub pid: u32,
    pub executable: PathBuf,
}

/// Whether an executable path belongs to one of the daemon binaries.
///
/// `/proc/<pid>/exe` links of replaced binaries carry a ` (deleted)` suffix;
/// such processes still count as running instances.
pub fn is_daemon_executable(exe_path: &Path) -> bool {
    let Some(name) = exe_path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.strip_suffix(" (deleted)").unwrap_or(name);
    DAEMON_EXECUTABLES.contains(&name)
}

/// Find another running instance, ignoring the calling process.
#[cfg(target_os = "linux")]
pub fn find_running_instance() -> Option<RunningInstance> {
    find_in_proc(Path::new("/proc"), std::process::id())
}

/// Process inspection is only implemented through procfs.
#[cfg(not(target_os = "linux"))]
pub fn find_running_instance() -> Option<RunningInstance> {
    None
}

/// Scan a procfs-shaped directory for daemon executables.
pub fn find_in_proc(proc_root: &Path, own_pid: u32) -> Option<RunningInstance> {
    let entries = std::fs::read_dir(proc_root).ok()?;

    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        // Processes of other users or already exited ones are unreadable
        let Ok(exe) = std::fs::read_link(entry.path().join("exe")) else {
            continue;
        };
        if is_daemon_executable(&exe) {
            return Some(RunningInstance {
                pid,
                executable: exe,
            });
        }
    }

    None
}
