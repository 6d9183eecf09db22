// src/watch/session.rs

//! The watch loop: filesystem events → debounced rebuild cycles.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::errors::Result;
use crate::types::TaskName;
use crate::watch::debounce::Debouncer;
use crate::watch::subscription::{tasks_for_path, watch_roots, WatchSubscription};
use crate::watch::watcher::{spawn_fs_watcher, WatcherHandle};

/// How often roots that were missing at startup are checked again, on top
/// of the check done on every change event.
const MISSING_ROOT_RETRY: Duration = Duration::from_secs(2);

/// Whatever runs a rebuild for a set of triggered tasks.
///
/// Production uses the engine (plan + execute); tests can record cycles.
pub trait RebuildBackend: Send {
    fn run_cycle(&mut self, tasks: Vec<TaskName>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Counters reported when the session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub events: usize,
    pub cycles: usize,
    pub failed_cycles: usize,
}

/// A running watch session.
pub struct WatchSession<B: RebuildBackend> {
    subscriptions: Arc<Vec<WatchSubscription>>,
    debouncer: Debouncer,
    events: mpsc::UnboundedReceiver<PathBuf>,
    backend: B,
    watcher: Option<WatcherHandle>,
    stats: SessionStats,
}

impl<B: RebuildBackend> std::fmt::Debug for WatchSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("subscriptions", &self.subscriptions.len())
            .field("debouncer", &self.debouncer)
            .field("watcher", &self.watcher)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<B: RebuildBackend> WatchSession<B> {
    /// Start OS watchers on the base directories of `subscriptions`.
    pub fn start(subscriptions: Vec<WatchSubscription>, debounce: Duration, backend: B) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let roots = watch_roots(&subscriptions);
        let watcher = spawn_fs_watcher(&roots, tx)?;

        let mut session = Self::from_channel(subscriptions, debounce, backend, rx);
        session.watcher = Some(watcher);
        Ok(session)
    }

    /// Build a session fed by an existing channel instead of OS watchers.
    pub fn from_channel(
        subscriptions: Vec<WatchSubscription>,
        debounce: Duration,
        backend: B,
        events: mpsc::UnboundedReceiver<PathBuf>,
    ) -> Self {
        Self {
            subscriptions: Arc::new(subscriptions),
            debouncer: Debouncer::new(debounce),
            events,
            backend,
            watcher: None,
            stats: SessionStats::default(),
        }
    }

    /// Process events until `shutdown` resolves or the event channel closes.
    ///
    /// A cycle that is already running is never interrupted: events keep
    /// buffering in the channel and are coalesced into the next cycle.
    /// Failed cycles are logged and watching continues.
    pub async fn run<F>(mut self, shutdown: F) -> SessionStats
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(
            subscriptions = self.subscriptions.len(),
            debounce_ms = self.debouncer.window().as_millis() as u64,
            "watching for changes"
        );

        let mut retry = tokio::time::interval(MISSING_ROOT_RETRY);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let deadline = self.debouncer.deadline();

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown requested; stopping watch session");
                    break;
                }

                maybe_path = self.events.recv() => {
                    let Some(path) = maybe_path else {
                        debug!("event channel closed");
                        break;
                    };
                    self.retry_missing_roots();
                    self.on_event(path);
                }

                _ = sleep_until_opt(deadline) => {
                    self.run_cycle().await;
                }

                _ = retry.tick(), if self.has_missing_roots() => {
                    self.retry_missing_roots();
                }
            }
        }

        info!(
            events = self.stats.events,
            cycles = self.stats.cycles,
            failed = self.stats.failed_cycles,
            "watch session finished"
        );
        self.stats
    }

    fn has_missing_roots(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.missing().is_empty())
    }

    fn retry_missing_roots(&mut self) {
        if let Some(watcher) = self.watcher.as_mut() {
            if !watcher.missing().is_empty() {
                watcher.retry_missing();
            }
        }
    }

    fn on_event(&mut self, path: PathBuf) {
        self.stats.events += 1;
        let tasks = tasks_for_path(&self.subscriptions, &path);
        if tasks.is_empty() {
            debug!(path = ?path, "change matches no subscription");
            return;
        }
        debug!(path = ?path, tasks = ?tasks, "change triggers tasks");
        self.debouncer.record(tasks, Instant::now());
    }

    async fn run_cycle(&mut self) {
        // Fold in anything that arrived while we were waiting on the timer.
        while let Ok(path) = self.events.try_recv() {
            self.on_event(path);
        }
        if !self.debouncer.is_due(Instant::now()) {
            return;
        }

        let tasks = self.debouncer.take();
        self.stats.cycles += 1;
        info!(cycle = self.stats.cycles, tasks = ?tasks, "change detected; rebuilding");

        if let Err(err) = self.backend.run_cycle(tasks).await {
            self.stats.failed_cycles += 1;
            error!(error = %err, "rebuild failed; still watching");
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
