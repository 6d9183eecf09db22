// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{ConfigFile, PathRole, RawConfigFile, StageSpec, TaskConfig, WatchSpec};
use crate::errors::{AssetdagError, Result};
use crate::pipeline::PathPattern;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = AssetdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.paths, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    for (role, spec) in &cfg.paths {
        validate_path_role(role, spec)?;
    }
    for (name, task) in &cfg.task {
        validate_task(cfg, name, task)?;
    }
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn config_err(msg: impl Into<String>) -> AssetdagError {
    AssetdagError::Config(msg.into())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_err(
            "config must contain at least one [task.<name>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.concurrency == Some(0) {
        return Err(config_err("[config].concurrency must be >= 1 (got 0)"));
    }
    if cfg.config.debounce_ms == 0 {
        return Err(config_err("[config].debounce_ms must be >= 1 (got 0)"));
    }
    Ok(())
}

/// Compile globs once so bad patterns fail at startup, not on first run.
fn check_globs(owner: &str, globs: &[String]) -> Result<()> {
    match PathPattern::new(".", globs) {
        Ok(_) => Ok(()),
        Err(AssetdagError::Config(msg)) => Err(config_err(format!("{owner}: {msg}"))),
        Err(other) => Err(other),
    }
}

fn validate_path_role(role: &str, spec: &PathRole) -> Result<()> {
    let owner = format!("[paths.{role}]");
    check_globs(&format!("{owner}.src"), &spec.src.to_vec())?;
    if let Some(watch) = &spec.watch {
        check_globs(&format!("{owner}.watch"), &watch.to_vec())?;
    }
    if spec.dest.as_ref().is_some_and(|d| d.as_os_str().is_empty()) {
        return Err(config_err(format!("{owner}.dest must not be empty")));
    }
    Ok(())
}

fn validate_task(cfg: &RawConfigFile, name: &str, task: &TaskConfig) -> Result<()> {
    let owner = format!("[task.{name}]");

    let role = match &task.input {
        Some(role) => Some(cfg.paths.get(role).ok_or_else(|| {
            config_err(format!("{owner} uses unknown input '{role}' (no [paths.{role}])"))
        })?),
        None => None,
    };

    if let Some(src) = &task.src {
        check_globs(&format!("{owner}.src"), &src.to_vec())?;
    }

    if !task.stages.is_empty() && !task.has_sources() {
        return Err(config_err(format!(
            "{owner} has stages but no sources (set `input` or `src`)"
        )));
    }

    if task.runs_pipeline() {
        let dest = task.dest.as_ref().or(role.and_then(|r| r.dest.as_ref()));
        match dest {
            None => {
                return Err(config_err(format!(
                    "{owner} reads sources but has no destination (set `dest` here or on the input role)"
                )));
            }
            Some(d) if d.as_os_str().is_empty() => {
                return Err(config_err(format!("{owner}.dest must not be empty")));
            }
            Some(_) => {}
        }
    }

    if task.cmd.is_none() && (!task.args.is_empty() || task.cwd.is_some()) {
        return Err(config_err(format!("{owner} sets `args`/`cwd` without `cmd`")));
    }
    if task.cmd.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(config_err(format!("{owner}.cmd must not be empty")));
    }

    match &task.watch {
        Some(WatchSpec::Enabled(true)) if !task.has_sources() => {
            return Err(config_err(format!(
                "{owner} sets `watch = true` but has no sources to watch"
            )));
        }
        Some(WatchSpec::Globs(globs)) => check_globs(&format!("{owner}.watch"), &globs.to_vec())?,
        _ => {}
    }

    for (index, stage) in task.stages.iter().enumerate() {
        validate_stage(&format!("{owner}.stages[{index}]"), stage)?;
    }

    Ok(())
}

fn validate_stage(owner: &str, stage: &StageSpec) -> Result<()> {
    match stage {
        StageSpec::Replace { pattern, .. } => {
            Regex::new(pattern)
                .map_err(|e| config_err(format!("{owner}: invalid pattern '{pattern}': {e}")))?;
        }
        StageSpec::Concat { file, .. } if file.trim().is_empty() => {
            return Err(config_err(format!("{owner}: concat needs a `file` name")));
        }
        StageSpec::Filter { cmd, .. } if cmd.trim().is_empty() => {
            return Err(config_err(format!("{owner}: filter needs a `cmd`")));
        }
        _ => {}
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(AssetdagError::Cycle(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(config_err(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(AssetdagError::Cycle(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}
