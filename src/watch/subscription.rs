// src/watch/subscription.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::pipeline::PathPattern;
use crate::types::TaskName;

/// A (pattern, task) pair: changes matching the pattern trigger the task.
#[derive(Debug, Clone)]
pub struct WatchSubscription {
    pattern: PathPattern,
    task: TaskName,
}

impl WatchSubscription {
    pub fn new(pattern: PathPattern, task: impl Into<TaskName>) -> Self {
        Self {
            pattern,
            task: task.into(),
        }
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches(path)
    }
}

/// Tasks subscribed to `path`, deduplicated.
pub fn tasks_for_path(subscriptions: &[WatchSubscription], path: &Path) -> BTreeSet<TaskName> {
    subscriptions
        .iter()
        .filter(|s| s.matches(path))
        .map(|s| s.task.clone())
        .collect()
}

/// Distinct base directories that need a filesystem watcher.
pub fn watch_roots(subscriptions: &[WatchSubscription]) -> Vec<PathBuf> {
    let bases: BTreeSet<PathBuf> = subscriptions
        .iter()
        .map(|s| s.pattern.base().to_path_buf())
        .collect();

    // A base nested under another watched base is already covered.
    let mut roots: Vec<PathBuf> = Vec::new();
    for base in bases {
        if !roots.iter().any(|r| base.starts_with(r)) {
            roots.push(base);
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(base: &str, glob: &str, task: &str) -> WatchSubscription {
        WatchSubscription::new(PathPattern::single(base, glob).unwrap(), task)
    }

    #[test]
    fn one_path_can_trigger_several_tasks() {
        let subs = vec![
            sub("/site", "src/**/*.scss", "sass"),
            sub("/site", "src/**/*.scss", "styleguide"),
            sub("/site", "src/**/*.js", "scripts"),
        ];
        let tasks = tasks_for_path(&subs, Path::new("/site/src/components/button.scss"));
        assert_eq!(tasks.into_iter().collect::<Vec<_>>(), vec!["sass", "styleguide"]);
    }

    #[test]
    fn nested_bases_collapse_into_one_root() {
        let subs = vec![
            sub("/site", "src/**/*.scss", "sass"),
            sub("/site/src/img", "**/*", "images"),
            sub("/other", "*.md", "docs"),
        ];
        assert_eq!(
            watch_roots(&subs),
            vec![PathBuf::from("/other"), PathBuf::from("/site")]
        );
    }
}
