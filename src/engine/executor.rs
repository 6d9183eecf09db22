// src/engine/executor.rs

//! Batch executor: runs an [`ExecutionPlan`] against the registry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dag::{ExecutionPlan, TaskContext, TaskRegistry};
use crate::errors::{AssetdagError, Result};
use crate::types::TaskName;

/// Summary of a successful `execute()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub run_id: u64,
    pub batches: usize,
    /// Tasks that ran to completion, per batch, sorted by name.
    pub completed: Vec<Vec<TaskName>>,
    pub tasks_run: usize,
    /// Tasks marked `allow_failure` that failed during this run.
    pub tolerated_failures: Vec<TaskName>,
    pub elapsed: Duration,
}

enum Outcome {
    Finished(Result<()>),
    Skipped,
}

/// Parallelism used when neither the CLI nor the config sets one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get())
}

/// Runs plans batch by batch. Cheap to clone; clones share the run counter.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<TaskRegistry>,
    concurrency: usize,
    next_run: Arc<AtomicU64>,
}

impl Executor {
    pub fn new(registry: Arc<TaskRegistry>, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency: concurrency.max(1),
            next_run: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every batch of `plan` in order.
    ///
    /// Tasks inside a batch run concurrently, at most `concurrency` at once.
    /// A batch starts only after every task of the previous one finished.
    /// On the first failure of a task without `allow_failure`, tasks of the
    /// same batch that already started run to completion, the rest of the
    /// batch is skipped and later batches never start; the first error is
    /// returned.
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionReport> {
        let run_id = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let mut report = ExecutionReport {
            run_id,
            ..ExecutionReport::default()
        };

        info!(run_id, batches = plan.batches().len(), tasks = plan.task_count(), "starting run");

        for (index, batch) in plan.batches().iter().enumerate() {
            self.check_outputs(batch)?;
            debug!(run_id, batch = index + 1, tasks = ?batch, "starting batch");

            self.run_batch(run_id, batch, &mut report).await?;
            report.batches += 1;
        }

        report.elapsed = started.elapsed();
        info!(
            run_id,
            tasks = report.tasks_run,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    /// Two tasks in one batch must not write to overlapping outputs.
    fn check_outputs(&self, batch: &[TaskName]) -> Result<()> {
        for (i, a) in batch.iter().enumerate() {
            let task_a = self.registry.lookup(a)?;
            for b in &batch[i + 1..] {
                let task_b = self.registry.lookup(b)?;
                for claim_a in task_a.outputs() {
                    if let Some(claim_b) = task_b.outputs().iter().find(|c| claim_a.overlaps(c)) {
                        return Err(AssetdagError::Config(format!(
                            "tasks '{a}' and '{b}' run concurrently but both write to {claim_a} / {claim_b}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        run_id: u64,
        batch: &[TaskName],
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let failed = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for name in batch {
            let task = self.registry.lookup(name)?;
            let work = Arc::clone(task.work());
            let allow_failure = task.allows_failure();
            let semaphore = Arc::clone(&semaphore);
            let failed = Arc::clone(&failed);
            let ctx = TaskContext {
                task: name.clone(),
                run_id,
            };

            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (ctx.task, allow_failure, Outcome::Skipped);
                };
                if failed.load(Ordering::SeqCst) {
                    return (ctx.task, allow_failure, Outcome::Skipped);
                }

                info!(task = %ctx.task, run_id, "task started");
                let started = Instant::now();
                let result = work.run(&ctx).await;
                if result.is_err() && !allow_failure {
                    failed.store(true, Ordering::SeqCst);
                }
                debug!(
                    task = %ctx.task,
                    run_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "task work returned"
                );
                (ctx.task, allow_failure, Outcome::Finished(result))
            });
        }

        let mut first_error: Option<AssetdagError> = None;
        let mut completed: Vec<TaskName> = Vec::with_capacity(batch.len());

        while let Some(joined) = set.join_next().await {
            let (name, allow_failure, outcome) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    failed.store(true, Ordering::SeqCst);
                    error!(run_id, error = %join_err, "task panicked");
                    first_error.get_or_insert_with(|| {
                        AssetdagError::Other(anyhow::anyhow!("task panicked: {join_err}"))
                    });
                    continue;
                }
            };

            match outcome {
                Outcome::Skipped => {
                    debug!(task = %name, run_id, "skipped after earlier failure");
                }
                Outcome::Finished(Ok(())) => {
                    report.tasks_run += 1;
                    info!(task = %name, run_id, "task finished");
                    completed.push(name);
                }
                Outcome::Finished(Err(err)) if allow_failure => {
                    report.tasks_run += 1;
                    warn!(task = %name, run_id, error = %err, "task failed (allowed)");
                    report.tolerated_failures.push(name.clone());
                    completed.push(name);
                }
                Outcome::Finished(Err(err)) => {
                    error!(task = %name, run_id, error = %err, "task failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        completed.sort();
        report.completed.push(completed);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{plan, OutputClaim, Task};
    use crate::engine::work::GroupWork;

    #[tokio::test]
    async fn overlapping_outputs_in_one_batch_are_rejected() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Task::new("sass", Arc::new(GroupWork)).output(OutputClaim::dir("/site/dist")))
            .unwrap();
        registry
            .register(Task::new("twig", Arc::new(GroupWork)).output(OutputClaim::dir("/site/dist")))
            .unwrap();
        let registry = Arc::new(registry);

        let plan = plan(&registry, &["sass", "twig"]).unwrap();
        let err = Executor::new(registry, 2).execute(&plan).await.unwrap_err();
        assert!(matches!(err, AssetdagError::Config(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn same_output_in_different_batches_is_fine() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Task::new("a", Arc::new(GroupWork)).output(OutputClaim::dir("/out")))
            .unwrap();
        registry
            .register(
                Task::new("b", Arc::new(GroupWork))
                    .depends_on(["a"])
                    .output(OutputClaim::dir("/out")),
            )
            .unwrap();
        let registry = Arc::new(registry);

        let plan = plan(&registry, &["b"]).unwrap();
        let report = Executor::new(registry, 1).execute(&plan).await.unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.tasks_run, 2);
        assert_eq!(report.completed, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[tokio::test]
    async fn run_ids_increase() {
        let mut registry = TaskRegistry::new();
        registry.register(Task::new("a", Arc::new(GroupWork))).unwrap();
        let registry = Arc::new(registry);
        let executor = Executor::new(Arc::clone(&registry), 0);
        assert_eq!(executor.concurrency(), 1);

        let plan = plan(&registry, &["a"]).unwrap();
        let first = executor.execute(&plan).await.unwrap();
        let second = executor.clone().execute(&plan).await.unwrap();
        assert!(second.run_id > first.run_id);
    }
}
