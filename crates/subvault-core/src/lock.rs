use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, VaultError};

/// Contents of the advisory lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: String,
}

const DEFAULT_STALE_LOCK_SECS: i64 = 6 * 60 * 60; // 6 hours

/// Handle to an acquired lock. Release it with [`release_lock`].
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Acquire the single-orchestrator lock at `path`.
///
/// The lock file is created exclusively, so two processes racing here cannot
/// both win. A lock left behind by a dead local process is replaced at once.
/// A lock from another host is replaced once it is older than six hours; a
/// lock whose local holder is still running is never replaced.
pub fn acquire_lock(path: &Path) -> Result<LockGuard> {
    cleanup_stale_lock(path, Duration::seconds(DEFAULT_STALE_LOCK_SECS))?;

    let entry = LockEntry {
        hostname: crate::platform::hostname(),
        pid: std::process::id(),
        time: Utc::now().to_rfc3339(),
    };
    let data = serde_json::to_vec(&entry)?;

    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(VaultError::Locked(describe_holder(path)));
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(&data)?;
    file.sync_all()?;

    debug!(path = %path.display(), "lock acquired");
    Ok(LockGuard {
        path: path.to_path_buf(),
    })
}

pub fn release_lock(guard: LockGuard) -> Result<()> {
    match std::fs::remove_file(&guard.path) {
        Ok(()) => {
            debug!(path = %guard.path.display(), "lock released");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Forcibly remove the lock. Returns whether a lock was present.
pub fn break_lock(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn describe_holder(path: &Path) -> String {
    std::fs::read(path)
        .ok()
        .and_then(|data| serde_json::from_slice::<LockEntry>(&data).ok())
        .map(|e| format!("{} pid {} since {}", e.hostname, e.pid, e.time))
        .unwrap_or_else(|| path.display().to_string())
}

fn cleanup_stale_lock(path: &Path, max_age: Duration) -> Result<()> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let Ok(entry) = serde_json::from_slice::<LockEntry>(&data) else {
        // A torn write from a crashed process; nobody can hold it.
        warn!(path = %path.display(), "removing unreadable lock file");
        return remove_stale(path);
    };

    if entry.hostname == crate::platform::hostname() {
        // The pid is authoritative on this host, however old the lock is.
        if crate::platform::process_alive(entry.pid) {
            return Ok(());
        }
        warn!(pid = entry.pid, "removing lock held by a process that no longer exists");
        return remove_stale(path);
    }

    let Ok(acquired) = chrono::DateTime::parse_from_rfc3339(&entry.time) else {
        return Ok(());
    };
    if Utc::now().signed_duration_since(acquired.with_timezone(&Utc)) > max_age {
        warn!(holder = %entry.hostname, pid = entry.pid, "removing stale lock");
        return remove_stale(path);
    }
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    break_lock(path).map(|_| ())
}
