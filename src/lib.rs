// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod watch;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{build_registry, config_root_dir, load_and_validate, ConfigFile};
use crate::dag::{ExecutionPlan, TaskRegistry};
use crate::engine::{default_concurrency, Engine};
use crate::errors::{AssetdagError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::pipeline::open_hash_store;
use crate::watch::{WatchSession, WatchSubscription};

/// High-level entry point used by `main.rs`.
///
/// Loads the config, builds the registry, then either lists tasks, prints a
/// plan, runs it once, or runs it and keeps rebuilding on changes.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root = project_root(&config_path)?;

    let registry = load_registry(&cfg, &root)?;
    let concurrency = resolve_concurrency(args.concurrency, &cfg)?;

    match args.command {
        Command::List => {
            print_task_list(&registry);
            Ok(())
        }
        Command::Run {
            task,
            watch,
            dry_run,
        } => {
            let engine = Engine::new(Arc::new(registry), concurrency);
            let plan = engine.plan(&[task.as_str()])?;

            if dry_run {
                print_plan(&task, &plan);
                return Ok(());
            }

            let initial = engine.execute(&plan).await;
            if !watch {
                let report = initial?;
                info!(
                    tasks = report.tasks_run,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "build finished"
                );
                return Ok(());
            }

            match initial {
                Err(err) if err.is_fatal_config() => return Err(err),
                Err(err) => error!(error = %err, "initial build failed; watching anyway"),
                Ok(report) => info!(tasks = report.tasks_run, "initial build finished"),
            }

            let subscriptions = subscriptions_for_plan(engine.registry(), &plan);
            if subscriptions.is_empty() {
                warn!(task = %task, "no task in the plan has watch patterns; nothing to watch");
                return Ok(());
            }

            let debounce = Duration::from_millis(cfg.config.debounce_ms);
            let session = WatchSession::start(subscriptions, debounce, engine)?;
            session.run(shutdown_signal()).await;
            Ok(())
        }
    }
}

/// Canonical directory that relative config paths resolve against.
fn project_root(config_path: &Path) -> Result<PathBuf> {
    let root = config_root_dir(config_path);
    root.canonicalize().map_err(|e| AssetdagError::io(&root, e))
}

fn load_registry(cfg: &ConfigFile, root: &Path) -> Result<TaskRegistry> {
    let hashes = open_hash_store(cfg.config.hash_storage_mode, root);
    {
        let task_names: Vec<&str> = cfg.task.keys().map(String::as_str).collect();
        let mut store = hashes
            .lock()
            .map_err(|_| AssetdagError::Other(anyhow::anyhow!("hash store mutex poisoned")))?;
        // Hashes of renamed or removed tasks would never be read again.
        if let Err(e) = store.prune(&task_names) {
            warn!("failed to prune stale hashes: {e}");
        }
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    build_registry(cfg, root, fs, Some(hashes))
}

/// `--concurrency` wins over `[config].concurrency`; CPU count otherwise.
fn resolve_concurrency(cli: Option<usize>, cfg: &ConfigFile) -> Result<usize> {
    match cli.or(cfg.config.concurrency) {
        Some(0) => Err(AssetdagError::Config("concurrency must be >= 1 (got 0)".to_string())),
        Some(n) => Ok(n),
        None => Ok(default_concurrency()),
    }
}

/// Only tasks that are part of the plan rebuild on changes.
fn subscriptions_for_plan(registry: &TaskRegistry, plan: &ExecutionPlan) -> Vec<WatchSubscription> {
    let planned: BTreeSet<&str> = plan
        .batches()
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();
    registry
        .subscriptions()
        .into_iter()
        .filter(|s| planned.contains(s.task()))
        .collect()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

fn print_plan(task: &str, plan: &ExecutionPlan) {
    println!("assetdag dry-run: {task}");
    print!("{plan}");
    println!("{} task(s) in {} batch(es)", plan.task_count(), plan.batches().len());
}

fn print_task_list(registry: &TaskRegistry) {
    println!("tasks ({}):", registry.len());
    for task in registry.tasks() {
        println!("  - {}", task.name());
        println!("      work: {}", task.work().describe());
        if !task.dependencies().is_empty() {
            println!("      after: {}", task.dependencies().join(", "));
        }
        for pattern in task.watch_patterns() {
            println!("      watch: {pattern}");
        }
        if task.allows_failure() {
            println!("      allow_failure: true");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfigFile;

    fn cfg(src: &str) -> ConfigFile {
        let raw: RawConfigFile = toml::from_str(src).unwrap();
        ConfigFile::try_from(raw).unwrap()
    }

    #[test]
    fn cli_concurrency_overrides_config() {
        let cfg = cfg("[config]\nconcurrency = 3\n[task.a]\n");
        assert_eq!(resolve_concurrency(Some(8), &cfg).unwrap(), 8);
        assert_eq!(resolve_concurrency(None, &cfg).unwrap(), 3);
        assert!(resolve_concurrency(Some(0), &cfg).is_err());
    }
}
