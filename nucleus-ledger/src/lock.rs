//! Advisory, filesystem-scoped lock manager (§4.1).
//!
//! One lockfile per resource key under `BrainRoot/.locks/<key>.lock`.
//! Acquisition is an exclusive-create loop with backoff; release happens
//! on every exit path via [`LockHandle`]'s `Drop` impl, the same
//! `get_lock(...).section()` acquire/release discipline used elsewhere
//! in this codebase but expressed as RAII instead of a context manager.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

/// Errors from lock acquisition.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock could not be acquired before the configured wait elapsed.
    #[error("lock contended: {0}")]
    Contended(String),

    /// An I/O error occurred while acquiring or stamping the lock.
    #[error("lock io error: {0}")]
    Io(String),
}

/// Metadata stamped into a lockfile for diagnostics (§4.1).
#[derive(Debug, Clone, Serialize)]
struct LockMetadata<'a> {
    resource_key: &'a str,
    holder_pid: u32,
    reason: &'a str,
    acquired_at: String,
}

/// Advisory file lock manager rooted at `BrainRoot/.locks`.
#[derive(Debug, Clone)]
pub struct LockManager {
    locks_dir: PathBuf,
    default_wait: Duration,
    poll_interval: Duration,
}

impl LockManager {
    /// Create a lock manager. `locks_dir` is typically `BrainRoot/.locks`.
    pub fn new(locks_dir: impl Into<PathBuf>, default_wait: Duration) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            default_wait,
            poll_interval: Duration::from_millis(20),
        }
    }

    /// Acquire the named lock, retrying with a short backoff until
    /// `default_wait` elapses.
    pub async fn acquire(&self, resource_key: &str) -> Result<LockHandle, LockError> {
        self.acquire_with_reason(resource_key, "").await
    }

    /// Acquire the named lock, stamping `reason` into the lockfile body
    /// for diagnostics.
    pub async fn acquire_with_reason(
        &self,
        resource_key: &str,
        reason: &str,
    ) -> Result<LockHandle, LockError> {
        tokio::fs::create_dir_all(&self.locks_dir)
            .await
            .map_err(|e| LockError::Io(e.to_string()))?;

        let path = self.lock_path(resource_key);
        let deadline = Instant::now() + self.default_wait;
        let mut backoff = self.poll_interval;

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let metadata = LockMetadata {
                        resource_key,
                        holder_pid: std::process::id(),
                        reason,
                        acquired_at: chrono::Utc::now().to_rfc3339(),
                    };
                    let body =
                        serde_json::to_vec(&metadata).map_err(|e| LockError::Io(e.to_string()))?;
                    use tokio::io::AsyncWriteExt;
                    let _ = file.write_all(&body).await;
                    return Ok(LockHandle { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Contended(resource_key.to_string()));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(250));
                }
                Err(e) => return Err(LockError::Io(e.to_string())),
            }
        }
    }

    fn lock_path(&self, resource_key: &str) -> PathBuf {
        self.locks_dir.join(format!("{resource_key}.lock"))
    }

    /// Whether any lockfiles remain. Used by shutdown tests (property 6).
    pub fn has_outstanding_locks(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.locks_dir) else {
            return false;
        };
        entries
            .flatten()
            .any(|e| e.path().extension().and_then(|s| s.to_str()) == Some("lock"))
    }
}

/// A held lock. Releases the lockfile when dropped, on every exit path
/// (normal return, early `?`, or panic unwind).
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
}

impl LockHandle {
    /// The lockfile path this handle holds, for diagnostics.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> LockManager {
        LockManager::new(dir, Duration::from_millis(150))
    }

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let handle = mgr.acquire("audit").await.unwrap();
        assert!(handle.path().exists());
        drop(handle);
        let handle2 = mgr.acquire("audit").await.unwrap();
        assert!(handle2.path().exists());
    }

    #[tokio::test]
    async fn concurrent_acquire_contends() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let _held = mgr.acquire("permissions").await.unwrap();
        let result = mgr.acquire("permissions").await;
        assert!(matches!(result, Err(LockError::Contended(_))));
    }

    #[tokio::test]
    async fn drop_removes_lockfile_leaving_none_outstanding() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        {
            let _held = mgr.acquire("audit").await.unwrap();
            assert!(mgr.has_outstanding_locks());
        }
        assert!(!mgr.has_outstanding_locks());
    }

    #[tokio::test]
    async fn different_resource_keys_do_not_contend() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let _a = mgr.acquire("audit").await.unwrap();
        let _b = mgr.acquire("permissions").await.unwrap();
    }
}
