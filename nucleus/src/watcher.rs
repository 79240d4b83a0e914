//! Change watcher (§4.11): an external contract kept for completeness,
//! not wired into the dispatch path. Nothing in this version needs
//! live-reload of on-disk state — `NucleusConfig` and the Tool Registry
//! are both fixed for the life of a process — but the trait documents
//! the seam a future live-reload feature would plug into, the same way
//! `layer0::watch` stays isolated from `brain::v2` elsewhere in this
//! codebase even though only one of its callers is wired up today.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from setting up or running a watch.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watcher io error: {0}")]
    Io(String),
}

/// Watches a set of paths for changes, invoking `callback` with the
/// path that changed. Implementations decide what "changed" means
/// (mtime, content hash, OS-level notify) and how to detect it.
#[async_trait::async_trait]
pub trait ChangeWatcher: Send + Sync {
    async fn watch(
        &self,
        paths: &[PathBuf],
        callback: Box<dyn Fn(PathBuf) + Send + Sync + 'static>,
    ) -> Result<(), WatcherError>;
}

/// A `stat`-mtime-polling watcher. Checks every `interval` whether any
/// watched path's mtime has advanced past what was last observed.
pub struct PollingWatcher {
    interval: Duration,
}

impl PollingWatcher {
    /// Build a watcher polling every `interval`. The default interval
    /// elsewhere in this crate is 2 seconds (§4.11).
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollingWatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait::async_trait]
impl ChangeWatcher for PollingWatcher {
    async fn watch(
        &self,
        paths: &[PathBuf],
        callback: Box<dyn Fn(PathBuf) + Send + Sync + 'static>,
    ) -> Result<(), WatcherError> {
        let mut last_seen: Vec<Option<std::time::SystemTime>> = vec![None; paths.len()];
        loop {
            for (i, path) in paths.iter().enumerate() {
                let mtime = std::fs::metadata(path).ok().and_then(|m| m.modified().ok());
                if mtime.is_some() && mtime != last_seen[i] {
                    last_seen[i] = mtime;
                    callback(path.clone());
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
