//! unRAID mover detection.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Pause reason the engine uses while the mover runs.
pub const MOVER_PAUSE_REASON: &str = "unRAID mover is running";

/// Status of the unRAID mover.
#[derive(Debug, Clone, Serialize)]
pub struct MoverStatus {
    pub is_running: bool,
    pub pid: Option<i32>,
}

/// Inspect the mover pid file.
///
/// The mover counts as running when the file holds a pid and `/proc/<pid>`
/// exists. Unreadable or malformed pid files read as not running.
pub fn mover_status(pid_path: &Path) -> MoverStatus {
    mover_status_in(pid_path, Path::new("/proc"))
}

fn mover_status_in(pid_path: &Path, proc_root: &Path) -> MoverStatus {
    let pid = std::fs::read_to_string(pid_path)
        .ok()
        .and_then(|content| content.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0);

    let is_running = pid
        .map(|pid| proc_root.join(pid.to_string()).exists())
        .unwrap_or(false);

    MoverStatus { is_running, pid }
}

/// Path of the directory holding the pid file.
pub fn pid_dir(pid_path: &Path) -> PathBuf {
    pid_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}
