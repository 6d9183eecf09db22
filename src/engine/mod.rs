// src/engine/mod.rs

//! Orchestration: plan requested tasks and execute the plan.
//!
//! [`Engine`] is what both the one-shot `run` command and the watch session
//! drive. The executor lives in [`executor`]; the [`TaskWork`] kinds built
//! from configuration live in [`work`].
//!
//! [`TaskWork`]: crate::dag::TaskWork

pub mod executor;
pub mod work;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::info;

use crate::dag::{plan, ExecutionPlan, TaskRegistry};
use crate::errors::Result;
use crate::types::TaskName;
use crate::watch::RebuildBackend;

pub use executor::{default_concurrency, ExecutionReport, Executor};
pub use work::{GroupWork, PipelineWork, ProcessWork, SequenceWork};

/// Registry plus executor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<TaskRegistry>,
    executor: Executor,
}

impl Engine {
    pub fn new(registry: Arc<TaskRegistry>, concurrency: usize) -> Self {
        let executor = Executor::new(Arc::clone(&registry), concurrency);
        Self { registry, executor }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn plan<S: AsRef<str>>(&self, requested: &[S]) -> Result<ExecutionPlan> {
        plan(&self.registry, requested)
    }

    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionReport> {
        self.executor.execute(plan).await
    }

    /// Plan and execute `requested` in one go.
    pub async fn run<S: AsRef<str>>(&self, requested: &[S]) -> Result<ExecutionReport> {
        let plan = self.plan(requested)?;
        self.execute(&plan).await
    }
}

impl RebuildBackend for Engine {
    fn run_cycle(&mut self, tasks: Vec<TaskName>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let report = self.run(tasks.as_slice()).await?;
            info!(
                run_id = report.run_id,
                tasks = report.tasks_run,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "rebuild finished"
            );
            Ok(())
        })
    }
}
