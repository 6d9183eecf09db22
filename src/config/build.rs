// src/config/build.rs

//! Turn a validated [`ConfigFile`] into a [`TaskRegistry`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::model::{ConfigFile, PathRole, StageSpec, TaskConfig, WatchSpec};
use crate::dag::{OutputClaim, Task, TaskRegistry, TaskWork};
use crate::engine::work::{GroupWork, PipelineWork, ProcessWork, SequenceWork};
use crate::errors::{AssetdagError, Result};
use crate::exec::ProcessSpec;
use crate::fs::FileSystem;
use crate::pipeline::stage::{Changed, Concat, Filter, Rename, Replace, Wrap};
use crate::pipeline::{PathPattern, SharedHashStore, Stage};

/// Instantiate the stage described by `spec`. Relative `cwd`s resolve
/// against `root`.
pub fn build_stage(spec: &StageSpec, root: &Path) -> Result<Box<dyn Stage>> {
    let stage: Box<dyn Stage> = match spec {
        StageSpec::Rename {
            dirname,
            prefix,
            suffix,
            extension,
        } => Box::new(Rename {
            dirname: dirname.clone(),
            prefix: prefix.clone(),
            suffix: suffix.clone(),
            extension: extension.clone(),
        }),
        StageSpec::Replace { pattern, with } => Box::new(Replace::new(pattern, with.clone())?),
        StageSpec::Concat { file, separator } => Box::new(Concat {
            file: file.clone(),
            separator: separator.clone(),
        }),
        StageSpec::Header { text } => Box::new(Wrap::header(text.clone())),
        StageSpec::Footer { text } => Box::new(Wrap::footer(text.clone())),
        StageSpec::Changed => Box::new(Changed),
        StageSpec::Filter { cmd, args, cwd } => Box::new(Filter {
            command: cmd.clone(),
            args: args.clone(),
            cwd: Some(cwd.as_ref().map_or_else(|| root.to_path_buf(), |c| root.join(c))),
        }),
    };
    Ok(stage)
}

/// Sources of a task after merging its `input` role with inline overrides.
struct ResolvedSources {
    base: PathBuf,
    src: Vec<String>,
    dest: Option<PathBuf>,
    watch: Vec<String>,
}

fn resolve_sources(cfg: &ConfigFile, task: &TaskConfig, root: &Path) -> Option<ResolvedSources> {
    if !task.has_sources() {
        return None;
    }
    let role: Option<&PathRole> = task.input.as_ref().and_then(|r| cfg.paths.get(r));

    let src = task
        .src
        .as_ref()
        .or(role.map(|r| &r.src))
        .map(|s| s.to_vec())
        .unwrap_or_default();
    let base = task
        .base
        .as_ref()
        .or(role.and_then(|r| r.base.as_ref()))
        .map_or_else(|| root.to_path_buf(), |b| root.join(b));
    let dest = task
        .dest
        .as_ref()
        .or(role.and_then(|r| r.dest.as_ref()))
        .map(|d| root.join(d));

    // Inline `src` replaces the role entirely, including its watch globs.
    let watch = match (&task.src, role.and_then(|r| r.watch.as_ref())) {
        (None, Some(w)) => w.to_vec(),
        _ => src.clone(),
    };

    Some(ResolvedSources {
        base,
        src,
        dest,
        watch,
    })
}

/// Output claim of a pipeline: a single file when the last stage that
/// decides paths is a `concat`, the whole destination otherwise.
fn output_claim(dest: &Path, stages: &[Box<dyn Stage>]) -> OutputClaim {
    let collapsed = stages
        .iter()
        .rev()
        .find(|s| s.renames())
        .and_then(|s| s.output_file());

    match collapsed {
        Some(file) => {
            let full = dest.join(file);
            match (full.parent(), full.file_name()) {
                (Some(dir), Some(name)) => OutputClaim::file(dir, name.to_string_lossy()),
                _ => OutputClaim::dir(dest),
            }
        }
        None => OutputClaim::dir(dest),
    }
}

fn build_task(
    cfg: &ConfigFile,
    name: &str,
    task_cfg: &TaskConfig,
    root: &Path,
    fs: &Arc<dyn FileSystem>,
    hashes: &Option<SharedHashStore>,
) -> Result<Task> {
    let sources = resolve_sources(cfg, task_cfg, root);
    let mut works: Vec<Arc<dyn TaskWork>> = Vec::new();
    let mut outputs: Vec<OutputClaim> = Vec::new();

    if let Some(cmd) = &task_cfg.cmd {
        let cwd = task_cfg
            .cwd
            .as_ref()
            .map_or_else(|| root.to_path_buf(), |c| root.join(c));
        let spec = ProcessSpec::new(cmd.clone())
            .args(task_cfg.args.iter().cloned())
            .cwd(cwd);
        works.push(Arc::new(ProcessWork::new(spec)));
    }

    if task_cfg.runs_pipeline() {
        let sources = sources.as_ref().ok_or_else(|| {
            AssetdagError::Config(format!("task '{name}' has a pipeline but no sources"))
        })?;
        let dest = sources.dest.clone().ok_or_else(|| {
            AssetdagError::Config(format!("task '{name}' has a pipeline but no destination"))
        })?;

        let stages = task_cfg
            .stages
            .iter()
            .map(|spec| build_stage(spec, root))
            .collect::<Result<Vec<_>>>()?;
        outputs.push(output_claim(&dest, &stages));

        let pattern = PathPattern::new(&sources.base, &sources.src)?;
        works.push(Arc::new(PipelineWork::new(
            pattern,
            stages,
            dest,
            Arc::clone(fs),
            hashes.clone(),
        )));
    }

    let work: Arc<dyn TaskWork> = match works.len() {
        0 => Arc::new(GroupWork),
        1 => works.remove(0),
        _ => Arc::new(SequenceWork(works)),
    };

    let mut task = Task::new(name, work)
        .depends_on(task_cfg.after.iter().cloned())
        .allow_failure(task_cfg.allow_failure);
    for claim in outputs {
        task = task.output(claim);
    }

    match &task_cfg.watch {
        Some(WatchSpec::Enabled(true)) => {
            if let Some(sources) = &sources {
                task = task.watch(PathPattern::new(&sources.base, &sources.watch)?);
            }
        }
        Some(WatchSpec::Globs(globs)) => {
            task = task.watch(PathPattern::new(root, &globs.to_vec())?);
        }
        Some(WatchSpec::Enabled(false)) | None => {}
    }

    Ok(task)
}

/// Build and validate the registry for every task in `cfg`.
///
/// `root` is the directory relative paths resolve against (the config
/// file's directory). `hashes` backs the `changed` stage.
pub fn build_registry(
    cfg: &ConfigFile,
    root: &Path,
    fs: Arc<dyn FileSystem>,
    hashes: Option<SharedHashStore>,
) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    for (name, task_cfg) in &cfg.task {
        let task = build_task(cfg, name, task_cfg, root, &fs, &hashes)?;
        debug!(task = %name, work = %task.work().describe(), "built task");
        registry.register(task)?;
    }
    registry.validate()?;
    Ok(registry)
}
