// src/watch/debounce.rs

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::types::TaskName;

/// Default quiet period before a rebuild starts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Coalesces triggered tasks until no new trigger arrived for `window`.
///
/// Every [`record`](Self::record) pushes the deadline back. Triggers that
/// arrive while a cycle is running simply accumulate; the session takes
/// them once the cycle is over.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: BTreeSet<TaskName>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeSet::new(),
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Add triggered tasks observed at `now` and reset the deadline.
    pub fn record<I>(&mut self, tasks: I, now: Instant)
    where
        I: IntoIterator<Item = TaskName>,
    {
        let mut tasks = tasks.into_iter().peekable();
        if tasks.peek().is_none() {
            return;
        }
        let before = self.pending.len();
        self.pending.extend(tasks);
        self.deadline = Some(now + self.window);
        debug!(
            added = self.pending.len() - before,
            pending = self.pending.len(),
            "debounce window reset"
        );
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Drain everything pending, sorted, and clear the deadline.
    pub fn take(&mut self) -> Vec<TaskName> {
        self.deadline = None;
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
