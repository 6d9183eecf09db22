use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetdag::dag::{Task, TaskContext, TaskRegistry, TaskWork, WorkFuture};
use assetdag::errors::AssetdagError;

/// What a [`RecordingWork`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkEvent {
    Started(String),
    Finished(String),
}

/// Shared log written by every [`RecordingWork`] of a test.
#[derive(Debug, Clone, Default)]
pub struct WorkLog {
    events: Arc<Mutex<Vec<WorkEvent>>>,
}

impl WorkLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: WorkEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<WorkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Names of tasks in the order they started.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                WorkEvent::Started(name) => Some(name),
                WorkEvent::Finished(_) => None,
            })
            .collect()
    }

    /// Index of an event in the log.
    pub fn position(&self, event: &WorkEvent) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Highest number of tasks that were running at the same time.
    pub fn max_parallel(&self) -> usize {
        let mut running = 0usize;
        let mut max = 0usize;
        for event in self.events() {
            match event {
                WorkEvent::Started(_) => {
                    running += 1;
                    max = max.max(running);
                }
                WorkEvent::Finished(_) => running = running.saturating_sub(1),
            }
        }
        max
    }
}

/// A fake unit of work that:
/// - records when it starts and finishes
/// - optionally sleeps to simulate a slow task
/// - optionally fails
#[derive(Debug, Clone)]
pub struct RecordingWork {
    log: WorkLog,
    delay: Duration,
    fail: bool,
}

impl RecordingWork {
    pub fn new(log: &WorkLog) -> Self {
        Self {
            log: log.clone(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl TaskWork for RecordingWork {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> WorkFuture<'a> {
        Box::pin(async move {
            self.log.push(WorkEvent::Started(ctx.task.clone()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.log.push(WorkEvent::Finished(ctx.task.clone()));
            if self.fail {
                return Err(AssetdagError::Other(anyhow::anyhow!(
                    "{} failed on purpose",
                    ctx.task
                )));
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        "(recording)".to_string()
    }
}

/// Register `(name, deps, work)` triples into a fresh registry.
pub fn registry_of(tasks: Vec<(&str, Vec<&str>, RecordingWork)>) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    for (name, deps, work) in tasks {
        registry
            .register(Task::new(name, Arc::new(work)).depends_on(deps))
            .expect("registering test task");
    }
    registry
}
