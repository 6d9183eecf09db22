// src/watch/watcher.rs

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use notify::event::EventKind;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keeps the notify watcher alive and remembers roots that did not exist
/// yet when watching started.
pub struct WatcherHandle {
    inner: RecommendedWatcher,
    watching: Vec<PathBuf>,
    missing: Vec<PathBuf>,
}

impl fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("watching", &self.watching)
            .field("missing", &self.missing)
            .finish_non_exhaustive()
    }
}

impl WatcherHandle {
    pub fn watching(&self) -> &[PathBuf] {
        &self.watching
    }

    pub fn missing(&self) -> &[PathBuf] {
        &self.missing
    }

    /// Try again to watch roots that were missing. Returns how many were
    /// added.
    pub fn retry_missing(&mut self) -> usize {
        let mut added = 0;
        let pending = std::mem::take(&mut self.missing);
        for root in pending {
            if root.is_dir() && self.inner.watch(&root, RecursiveMode::Recursive).is_ok() {
                info!(root = ?root, "watch root appeared; now watching");
                self.watching.push(root);
                added += 1;
            } else {
                self.missing.push(root);
            }
        }
        added
    }
}

/// Watch every root recursively and forward changed paths to `tx`.
///
/// Roots that do not exist are logged and kept for
/// [`WatcherHandle::retry_missing`]; they do not fail startup. Access
/// events (reads) are ignored.
pub fn spawn_fs_watcher(roots: &[PathBuf], tx: mpsc::UnboundedSender<PathBuf>) -> Result<WatcherHandle> {
    let mut inner = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for path in event.paths {
                    // The receiver is gone once the session shut down.
                    if tx.send(path).is_err() {
                        return;
                    }
                }
            }
            Err(err) => warn!(error = %err, "file watch error"),
        },
        Config::default(),
    )
    .context("creating file watcher")?;

    let mut watching = Vec::new();
    let mut missing = Vec::new();
    for root in roots {
        if !root.is_dir() {
            warn!(root = ?root, "watch root does not exist; will retry later");
            missing.push(root.clone());
            continue;
        }
        inner
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {:?}", root))?;
        debug!(root = ?root, "watching");
        watching.push(root.clone());
    }

    info!(roots = watching.len(), missing = missing.len(), "file watcher started");
    Ok(WatcherHandle {
        inner,
        watching,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn missing_roots_are_remembered_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("src");
        let later = dir.path().join("src-later");
        std::fs::create_dir_all(&present).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = spawn_fs_watcher(&[present.clone(), later.clone()], tx).unwrap();
        assert_eq!(handle.watching(), &[present]);
        assert_eq!(handle.missing(), &[later.clone()]);

        assert_eq!(handle.retry_missing(), 0);
        std::fs::create_dir_all(&later).unwrap();
        assert_eq!(handle.retry_missing(), 1);
        assert!(handle.missing().is_empty());
    }

    #[tokio::test]
    async fn file_writes_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = spawn_fs_watcher(&[root.clone()], tx).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(root.join("main.scss"), "body{}").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert!(path.ends_with("main.scss") || path.starts_with(&root));
    }
}
