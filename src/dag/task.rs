// src/dag/task.rs

//! Task definitions: identity, dependencies, unit of work, watch triggers
//! and the outputs a task claims.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::Result;
use crate::pipeline::PathPattern;
use crate::types::TaskName;

/// Boxed future returned by [`TaskWork::run`].
pub type WorkFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Per-invocation information handed to a task's work.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: TaskName,
    /// Identifier shared by every task of one `execute()` call.
    pub run_id: u64,
}

/// The unit of work a task performs once its dependencies are done.
///
/// Production work is built from configuration (pipelines, external
/// processes, grouping tasks); tests can supply their own implementation.
pub trait TaskWork: Send + Sync + fmt::Debug {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> WorkFuture<'a>;

    /// Short human-readable description for `list` output.
    fn describe(&self) -> String;
}

/// A destination a task writes into: a directory, optionally narrowed down
/// to a single file inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputClaim {
    pub dir: PathBuf,
    pub file: Option<String>,
}

impl OutputClaim {
    pub fn dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
        }
    }

    pub fn file(dir: impl Into<PathBuf>, file: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file: Some(file.into()),
        }
    }

    /// Two claims overlap when they target the same directory, unless both
    /// name distinct single files in it.
    ///
    /// Only the exact directory is compared: a claim on `dist` does not
    /// overlap one on `dist/assets/img`, so tasks writing into nested parts
    /// of one tree can share a batch.
    pub fn overlaps(&self, other: &OutputClaim) -> bool {
        if self.dir != other.dir {
            return false;
        }
        match (&self.file, &other.file) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for OutputClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}", self.dir.join(file).display()),
            None => write!(f, "{}/", self.dir.display()),
        }
    }
}

/// A named unit of build work with declared dependencies.
#[derive(Debug, Clone)]
pub struct Task {
    name: TaskName,
    depends_on: Vec<TaskName>,
    work: Arc<dyn TaskWork>,
    watch: Vec<PathPattern>,
    outputs: Vec<OutputClaim>,
    allow_failure: bool,
}

impl Task {
    pub fn new(name: impl Into<TaskName>, work: Arc<dyn TaskWork>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            work,
            watch: Vec::new(),
            outputs: Vec::new(),
            allow_failure: false,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn watch(mut self, pattern: PathPattern) -> Self {
        self.watch.push(pattern);
        self
    }

    pub fn output(mut self, claim: OutputClaim) -> Self {
        self.outputs.push(claim);
        self
    }

    /// Failures of this task are logged but do not fail the plan.
    pub fn allow_failure(mut self, allow: bool) -> Self {
        self.allow_failure = allow;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[TaskName] {
        &self.depends_on
    }

    pub fn work(&self) -> &Arc<dyn TaskWork> {
        &self.work
    }

    pub fn watch_patterns(&self) -> &[PathPattern] {
        &self.watch
    }

    pub fn outputs(&self) -> &[OutputClaim] {
        &self.outputs
    }

    pub fn allows_failure(&self) -> bool {
        self.allow_failure
    }

    /// Whether any watch pattern of this task matches `path`.
    pub fn is_triggered_by(&self, path: &Path) -> bool {
        self.watch.iter().any(|p| p.matches(path))
    }
}
