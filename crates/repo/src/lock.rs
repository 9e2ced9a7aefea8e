#![forbid(unsafe_code)]
//! Advisory exclusion via atomically-created lock directories, plus the
//! per-repository instance lock that fences cross-host opens.
//!
//! `mkdir` either succeeds or fails atomically on every major platform,
//! which is the whole trick: the lock directory's existence is the lock.
//! `owner.json` inside records who holds it so a dead holder can be
//! recognized and reclaimed.

use crate::error::RepoError;
use crate::fsutil::{now_secs, write_atomic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A lock older than this is reclaimable regardless of its pid; on
/// cross-host shared filesystems the age check is the only one that
/// applies.
pub const LOCK_MAX_AGE_SECS: i64 = 4 * 3600;

pub(crate) const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const OWNER_FILE: &str = "owner.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub pid: u32,
    pub hostname: String,
    pub started_at: i64,
}

impl LockOwner {
    pub(crate) fn current(agent_id: Option<&str>) -> Self {
        Self {
            agent_id: agent_id.map(str::to_string),
            pid: std::process::id(),
            hostname: hostname(),
            started_at: now_secs(),
        }
    }
}

pub(crate) fn hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            return name.to_string_lossy().into_owned();
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Signal 0 probe: does the pid exist? EPERM means it exists but is not
/// ours, which still counts as alive. Platforms without the probe report
/// alive and fall back to the age check.
pub(crate) fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Stale when too old, or when the recorded host is ours and its pid is
/// gone. A foreign host's live lock is never stale before the age cap.
pub(crate) fn owner_is_stale(owner: &LockOwner) -> bool {
    if now_secs() - owner.started_at > LOCK_MAX_AGE_SECS {
        return true;
    }
    owner.hostname == hostname() && !pid_alive(owner.pid)
}

pub(crate) fn read_owner(lock_dir: &Path) -> Option<LockOwner> {
    let raw = std::fs::read_to_string(lock_dir.join(OWNER_FILE)).ok()?;
    serde_json::from_str(&raw).ok()
}

/// One acquisition attempt. `Ok(true)` means we hold the lock.
fn try_acquire(lock_dir: &Path, agent_id: Option<&str>) -> Result<bool, RepoError> {
    match std::fs::create_dir_all(lock_dir.parent().unwrap_or(lock_dir))
        .and_then(|_| std::fs::create_dir(lock_dir))
    {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            if let Some(owner) = read_owner(lock_dir)
                && !owner_is_stale(&owner)
            {
                return Ok(false);
            }
            // Stale (or unreadable) holder. Remove and re-race the mkdir:
            // exactly one claimant wins the second attempt.
            debug!(lock_dir = %lock_dir.display(), "reclaiming stale lock");
            force_release(lock_dir);
            match std::fs::create_dir(lock_dir) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
                Err(err) => return Err(RepoError::Io(err)),
            }
        }
        Err(err) => return Err(RepoError::Io(err)),
    }

    let owner = LockOwner::current(agent_id);
    write_atomic(&lock_dir.join(OWNER_FILE), &serde_json::to_vec_pretty(&owner)?)?;
    Ok(true)
}

/// Acquire with a bounded busy-wait. A zero timeout is a single attempt
/// reporting `LockBusy`; otherwise exhaustion reports `LockTimeout`.
pub(crate) fn acquire(
    lock_dir: &Path,
    workspace: &str,
    agent_id: Option<&str>,
    timeout: Duration,
) -> Result<(), RepoError> {
    let start = Instant::now();
    loop {
        if try_acquire(lock_dir, agent_id)? {
            return Ok(());
        }
        if timeout.is_zero() {
            return Err(RepoError::LockBusy {
                workspace: workspace.to_string(),
                holder: read_owner(lock_dir),
            });
        }
        if start.elapsed() >= timeout {
            return Err(RepoError::LockTimeout {
                workspace: workspace.to_string(),
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
        std::thread::sleep(LOCK_RETRY_INTERVAL);
    }
}

pub(crate) fn force_release(lock_dir: &Path) {
    if let Err(err) = std::fs::remove_dir_all(lock_dir)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(lock_dir = %lock_dir.display(), error = %err, "failed to remove lock directory");
    }
}

/// Host fencing marker at `.state/instance.lock`. A live lock from a
/// different hostname fails the open; same-host processes coexist (the
/// database's WAL mode arbitrates locally).
#[derive(Debug)]
pub(crate) struct InstanceLock {
    path: PathBuf,
    owned: bool,
}

impl InstanceLock {
    pub(crate) fn acquire(path: PathBuf) -> Result<Self, RepoError> {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Ok(existing) = serde_json::from_str::<LockOwner>(&raw) {
                if !owner_is_stale(&existing) {
                    if existing.hostname != hostname() {
                        return Err(RepoError::ConcurrentAccess {
                            hostname: existing.hostname,
                            pid: existing.pid,
                        });
                    }
                    // Same host, another live process: leave its marker.
                    return Ok(Self { path, owned: false });
                }
            }
            // Unreadable or stale: overwrite below.
        }

        let owner = LockOwner::current(None);
        write_atomic(&path, &serde_json::to_vec_pretty(&owner)?)?;
        Ok(Self { path, owned: true })
    }

    pub(crate) fn release(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        let ours = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<LockOwner>(&raw).ok())
            .is_some_and(|owner| {
                owner.pid == std::process::id() && owner.hostname == hostname()
            });
        if ours {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn ancient_owner_is_stale_even_when_alive() {
        let owner = LockOwner {
            agent_id: None,
            pid: std::process::id(),
            hostname: hostname(),
            started_at: now_secs() - LOCK_MAX_AGE_SECS - 1,
        };
        assert!(owner_is_stale(&owner));
    }

    #[test]
    fn live_foreign_host_is_not_stale() {
        let owner = LockOwner {
            agent_id: None,
            pid: 1,
            hostname: "some-other-host".to_string(),
            started_at: now_secs(),
        };
        assert!(!owner_is_stale(&owner));
    }
}
