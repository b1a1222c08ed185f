use std::fs;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use camino::Utf8PathBuf;

use crate::clock::Clock;

/// Non-blocking provider of the global tool-execution lock.
///
/// At most one external-tool process may run at a time across the whole
/// system. Acquisition either succeeds immediately or reports contention;
/// nothing ever blocks waiting for the lock.
pub trait LockProvider: Send + Sync {
    /// `None` means another build is in progress — an expected outcome,
    /// not an error.
    fn try_acquire(&self) -> Option<LockGuard>;
}

/// Releases the underlying lock exactly once when dropped, whichever exit
/// path the protected build takes.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Marker-file advisory lock.
///
/// The marker's modification time doubles as the acquisition timestamp.
/// A marker older than the maximum tool execution duration is treated as
/// left behind by a crashed process and removed before one re-attempt —
/// the only automatic recovery in the system; there is no heartbeat.
pub struct FileLock {
    path: Utf8PathBuf,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl FileLock {
    pub fn new(path: impl Into<Utf8PathBuf>, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            max_age,
            clock,
        }
    }

    fn marker_age(&self) -> Option<i64> {
        let mtime = fs::metadata(&self.path).and_then(|meta| meta.modified()).ok()?;
        let mtime = mtime.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
        Some(self.clock.unix_seconds() - mtime)
    }
}

impl LockProvider for FileLock {
    fn try_acquire(&self) -> Option<LockGuard> {
        if let Some(age) = self.marker_age() {
            if age <= self.max_age.as_secs() as i64 {
                return None;
            }

            tracing::warn!("removing stale build lock {} (age {age}s)", self.path);
            let _ = fs::remove_file(&self.path);
        }

        if let Some(dir) = self.path.parent() {
            let _ = fs::create_dir_all(dir);
        }

        // create_new keeps two processes from both succeeding in the
        // window between the staleness check and the create
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                let path = self.path.clone();
                Some(LockGuard::new(move || {
                    let _ = fs::remove_file(&path);
                }))
            }
            Err(_) => None,
        }
    }
}
