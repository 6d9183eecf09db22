// src/engine/work.rs

//! [`TaskWork`] implementations built from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::debug;

use crate::dag::{TaskContext, TaskWork, WorkFuture};
use crate::exec::{spawn, ProcessSpec};
use crate::fs::FileSystem;
use crate::pipeline::{PathPattern, PipelineRunner, SharedHashStore, Stage};

/// Resolve a source pattern, run the stages, write under a destination.
#[derive(Debug, Clone)]
pub struct PipelineWork {
    source: PathPattern,
    stages: Arc<Vec<Box<dyn Stage>>>,
    destination: PathBuf,
    fs: Arc<dyn FileSystem>,
    hashes: Option<SharedHashStore>,
}

impl PipelineWork {
    pub fn new(
        source: PathPattern,
        stages: Vec<Box<dyn Stage>>,
        destination: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        hashes: Option<SharedHashStore>,
    ) -> Self {
        Self {
            source,
            stages: Arc::new(stages),
            destination: destination.into(),
            fs,
            hashes,
        }
    }
}

impl TaskWork for PipelineWork {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> WorkFuture<'a> {
        let this = self.clone();
        let task = ctx.task.clone();

        Box::pin(async move {
            // Reading, transforming and writing is blocking work.
            tokio::task::spawn_blocking(move || {
                let inputs = this.source.resolve(this.fs.as_ref())?;
                debug!(task = %task, files = inputs.len(), "resolved pipeline inputs");
                PipelineRunner::new(this.fs.as_ref(), this.hashes.clone())
                    .run(&task, &inputs, &this.stages, &this.destination)
                    .map(|_| ())
            })
            .await
            .map_err(|e| anyhow!("pipeline worker panicked: {e}"))?
        })
    }

    fn describe(&self) -> String {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        if stages.is_empty() {
            format!("{} -> {}", self.source, self.destination.display())
        } else {
            format!(
                "{} | {} -> {}",
                self.source,
                stages.join(" | "),
                self.destination.display()
            )
        }
    }
}

/// Run one external command.
#[derive(Debug, Clone)]
pub struct ProcessWork {
    spec: ProcessSpec,
}

impl ProcessWork {
    pub fn new(spec: ProcessSpec) -> Self {
        Self { spec }
    }
}

impl TaskWork for ProcessWork {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> WorkFuture<'a> {
        Box::pin(async move {
            spawn(&ctx.task, &self.spec).await?;
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("$ {}", self.spec.command_line())
    }
}

/// A task that only exists to group its dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupWork;

impl TaskWork for GroupWork {
    fn run<'a>(&'a self, _ctx: &'a TaskContext) -> WorkFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> String {
        "(group)".to_string()
    }
}

/// Several units of work run one after another; the first failure stops
/// the sequence.
#[derive(Debug, Clone)]
pub struct SequenceWork(pub Vec<Arc<dyn TaskWork>>);

impl TaskWork for SequenceWork {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> WorkFuture<'a> {
        Box::pin(async move {
            for work in &self.0 {
                work.run(ctx).await?;
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.0
            .iter()
            .map(|w| w.describe())
            .collect::<Vec<_>>()
            .join(", then ")
    }
}
