//! Per-resource lock file so two coordinators never drive the same host.
//!
//! Acquisition is a create-new write of a small JSON holder record. A record
//! older than the TTL is treated as left behind by a killed process and taken
//! over. Dropping the guard removes the file.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Longer than a worst-case poll plus a slow configuration run.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub resource_id: String,
    pub acquired_at_unix: u64,
}

impl LockHolder {
    fn age(&self, now: u64) -> Duration {
        Duration::from_secs(now.saturating_sub(self.acquired_at_unix))
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("resource '{resource_id}' is locked by pid {pid} (held for {held_secs}s, lock file {path})")]
    Held {
        resource_id: String,
        pid: u32,
        held_secs: u64,
        path: PathBuf,
    },
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct ResourceLock {
    path: PathBuf,
}

impl ResourceLock {
    pub fn acquire(path: &Path, resource_id: &str, ttl: Duration) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let holder = LockHolder {
            pid: std::process::id(),
            resource_id: resource_id.to_string(),
            acquired_at_unix: unix_now(),
        };

        // Two tries: the second follows removal of a stale lock.
        for _ in 0..2 {
            match try_create(path, &holder) {
                Ok(()) => {
                    debug!(target: "handoff::lock", path = %path.display(), "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let existing = read_holder(path);
                    let age = match existing.as_ref() {
                        Some(existing) => existing.age(holder.acquired_at_unix),
                        None => file_age(path),
                    };
                    if age < ttl {
                        let existing = existing.unwrap_or_else(|| LockHolder {
                            pid: 0,
                            resource_id: resource_id.to_string(),
                            acquired_at_unix: holder.acquired_at_unix,
                        });
                        return Err(LockError::Held {
                            resource_id: resource_id.to_string(),
                            pid: existing.pid,
                            held_secs: age.as_secs(),
                            path: path.to_path_buf(),
                        });
                    }
                    warn!(
                        target: "handoff::lock",
                        path = %path.display(),
                        stale_pid = existing.as_ref().map(|h| h.pid).unwrap_or_default(),
                        "taking over stale lock"
                    );
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(err) => return Err(io_err(err)),
                    }
                }
                Err(err) => return Err(io_err(err)),
            }
        }

        Err(io_err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "lock was re-acquired by another process during takeover",
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    target: "handoff::lock",
                    path = %self.path.display(),
                    error = %err,
                    "failed to release lock"
                );
            }
        }
    }
}

fn try_create(path: &Path, holder: &LockHolder) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let payload = serde_json::to_vec(holder).map_err(io::Error::other)?;
    file.write_all(&payload)?;
    file.sync_all()
}

/// Current holder of the lock at `path`, if any and readable.
pub fn read_holder(path: &Path) -> Option<LockHolder> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Age of a lock file whose contents could not be parsed, which is either a
/// holder mid-write or junk. Junk ages out like any other lock.
fn file_age(path: &Path) -> Duration {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i-1.lock");

        let guard = ResourceLock::acquire(&path, "i-1", DEFAULT_LOCK_TTL).unwrap();
        match ResourceLock::acquire(&path, "i-1", DEFAULT_LOCK_TTL) {
            Err(LockError::Held { pid, .. }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected held lock, got {other:?}"),
        }

        drop(guard);
        assert!(!path.exists());
        ResourceLock::acquire(&path, "i-1", DEFAULT_LOCK_TTL).unwrap();
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i-1.lock");
        let stale = LockHolder {
            pid: 424242,
            resource_id: "i-1".into(),
            acquired_at_unix: unix_now() - 3 * 60 * 60,
        };
        fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let guard = ResourceLock::acquire(&path, "i-1", DEFAULT_LOCK_TTL).unwrap();
        let holder = read_holder(guard.path()).unwrap();
        assert_eq!(holder.pid, std::process::id());
    }

    #[test]
    fn unreadable_fresh_lock_is_still_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i-1.lock");
        fs::write(&path, b"").unwrap();
        assert!(matches!(
            ResourceLock::acquire(&path, "i-1", DEFAULT_LOCK_TTL),
            Err(LockError::Held { pid: 0, .. })
        ));
        // zero TTL means anything already on disk is stale
        assert!(ResourceLock::acquire(&path, "i-1", Duration::ZERO).is_ok());
    }

    #[test]
    fn different_resources_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = ResourceLock::acquire(&dir.path().join("i-1.lock"), "i-1", DEFAULT_LOCK_TTL)
            .unwrap();
        let _b = ResourceLock::acquire(&dir.path().join("i-2.lock"), "i-2", DEFAULT_LOCK_TTL)
            .unwrap();
    }
}
