// src/dag/registry.rs

//! The task registry: owns every task definition for the process lifetime.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::debug;

use crate::dag::task::Task;
use crate::errors::{AssetdagError, Result};
use crate::types::TaskName;
use crate::watch::WatchSubscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Named tasks keyed by identifier.
///
/// Built once at startup, then shared read-only (behind an `Arc`) by the
/// scheduler and the watch session.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskName, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task.
    ///
    /// Fails with a configuration error if the name is taken and with a
    /// cycle error if the task depends on itself or would close a cycle
    /// through already-registered tasks. On failure nothing is registered.
    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(task.name()) {
            return Err(AssetdagError::Config(format!(
                "task '{}' is already registered",
                task.name()
            )));
        }

        if let Some(cycle) = self.find_cycle_through(&task) {
            return Err(AssetdagError::Cycle(format!(
                "registering task '{}' would create the cycle {}",
                task.name(),
                cycle.join(" -> ")
            )));
        }

        debug!(task = %task.name(), deps = ?task.dependencies(), "registered task");
        self.tasks.insert(task.name().to_string(), task);
        Ok(())
    }

    /// Look a task up by name.
    pub fn lookup(&self, name: &str) -> Result<&Task> {
        self.tasks
            .get(name)
            .ok_or_else(|| AssetdagError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Every task whose watch patterns match `changed`, sorted by name.
    pub fn list_dependents(&self, changed: &Path) -> Vec<TaskName> {
        self.tasks
            .values()
            .filter(|t| t.is_triggered_by(changed))
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Check that every declared dependency refers to a registered task.
    pub fn validate(&self) -> Result<()> {
        for task in self.tasks.values() {
            for dep in task.dependencies() {
                if !self.tasks.contains_key(dep) {
                    return Err(AssetdagError::Config(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.name(),
                        dep
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// One subscription per (watch pattern, task) pair.
    pub fn subscriptions(&self) -> Vec<WatchSubscription> {
        self.tasks
            .values()
            .flat_map(|task| {
                task.watch_patterns()
                    .iter()
                    .map(|pattern| WatchSubscription::new(pattern.clone(), task.name()))
            })
            .collect()
    }

    /// Depth-first search from `candidate` over the registered graph plus the
    /// candidate itself. Returns the offending path if a cycle is found.
    ///
    /// The registered graph is acyclic, so any new cycle passes through the
    /// candidate and a search rooted there is enough.
    fn find_cycle_through(&self, candidate: &Task) -> Option<Vec<TaskName>> {
        let deps_of = |name: &str| -> Vec<TaskName> {
            if name == candidate.name() {
                candidate.dependencies().to_vec()
            } else {
                self.tasks
                    .get(name)
                    .map(|t| t.dependencies().to_vec())
                    .unwrap_or_default()
            }
        };

        let mut marks: HashMap<TaskName, Mark> = HashMap::new();
        let mut path: Vec<TaskName> = Vec::new();
        // Explicit stack of (node, remaining deps) to avoid recursion.
        let mut stack: Vec<(TaskName, Vec<TaskName>)> = Vec::new();

        let root = candidate.name().to_string();
        marks.insert(root.clone(), Mark::Visiting);
        path.push(root.clone());
        stack.push((root.clone(), deps_of(&root)));

        while let Some((_, remaining)) = stack.last_mut() {
            match remaining.pop() {
                Some(dep) => match marks.get(&dep).copied() {
                    Some(Mark::Visiting) => {
                        let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<TaskName> = path[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Some(Mark::Visited) => {}
                    None => {
                        marks.insert(dep.clone(), Mark::Visiting);
                        path.push(dep.clone());
                        let deps = deps_of(&dep);
                        stack.push((dep, deps));
                    }
                },
                None => {
                    if let Some((done, _)) = stack.pop() {
                        marks.insert(done, Mark::Visited);
                        path.pop();
                    }
                }
            }
        }

        None
    }
}
