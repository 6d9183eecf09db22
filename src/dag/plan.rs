// src/dag/plan.rs

//! Execution planning: requested tasks → batches in dependency order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::dag::registry::TaskRegistry;
use crate::errors::{AssetdagError, Result};
use crate::types::TaskName;

/// Topologically sorted batches of task names.
///
/// Tasks inside one batch have no dependency edges between them and may run
/// concurrently; batches run strictly one after another. Names inside a
/// batch are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    batches: Vec<Vec<TaskName>>,
}

impl ExecutionPlan {
    pub fn batches(&self) -> &[Vec<TaskName>] {
        &self.batches
    }

    /// Total number of tasks in the plan.
    pub fn task_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Index of the batch containing `task`.
    pub fn batch_of(&self, task: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|t| t == task))
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(f, "  batch {}: {}", i + 1, batch.join(", "))?;
        }
        Ok(())
    }
}

/// Expand `requested` through their transitive dependencies and sort the
/// result into batches (Kahn's algorithm, one batch per round).
///
/// Unknown names fail with [`AssetdagError::NotFound`]. A cycle fails with
/// [`AssetdagError::Cycle`]; registration already rejects cycles, so this is
/// only a re-check.
pub fn plan<S: AsRef<str>>(registry: &TaskRegistry, requested: &[S]) -> Result<ExecutionPlan> {
    let mut included: BTreeSet<TaskName> = BTreeSet::new();
    let mut stack: Vec<TaskName> = Vec::new();

    for name in requested {
        let name = name.as_ref();
        registry.lookup(name)?;
        stack.push(name.to_string());
    }

    while let Some(name) = stack.pop() {
        if !included.insert(name.clone()) {
            continue;
        }
        let task = registry.lookup(&name)?;
        for dep in task.dependencies() {
            if !registry.contains(dep) {
                return Err(AssetdagError::NotFound(format!(
                    "{dep} (required by '{name}')"
                )));
            }
            if !included.contains(dep) {
                stack.push(dep.clone());
            }
        }
    }

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for name in &included {
        let task = registry.lookup(name)?;
        // Duplicate entries in `depends_on` count once.
        let deps: BTreeSet<&str> = task.dependencies().iter().map(String::as_str).collect();
        in_degree.insert(name.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(name.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut batches: Vec<Vec<TaskName>> = Vec::new();
    let mut placed = 0usize;

    while !ready.is_empty() {
        ready.sort_unstable();
        let mut next: Vec<&str> = Vec::new();

        for name in &ready {
            for dependent in dependents.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }

        placed += ready.len();
        batches.push(ready.iter().map(|s| s.to_string()).collect());
        ready = next;
    }

    if placed < included.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(name, _)| *name)
            .collect();
        return Err(AssetdagError::Cycle(format!(
            "tasks {} can never become ready",
            stuck.join(", ")
        )));
    }

    let plan = ExecutionPlan { batches };
    debug!(batches = plan.batches.len(), tasks = plan.task_count(), "execution plan ready");
    Ok(plan)
}
