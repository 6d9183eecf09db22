// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `assetdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "assetdag",
    version,
    about = "Build front-end assets through a task DAG, optionally rebuilding on file changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, global = true, value_name = "PATH", default_value = "Assetdag.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ASSETDAG_LOG` or `info` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Maximum number of tasks running at the same time.
    ///
    /// Overrides `[config].concurrency`.
    #[arg(long, global = true, value_name = "N")]
    pub concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a task and everything it depends on.
    Run {
        /// Task to run.
        #[arg(value_name = "TASK", default_value = "default")]
        task: String,

        /// Keep running and rebuild on file changes after the initial run.
        #[arg(long)]
        watch: bool,

        /// Print the execution plan without running anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// List configured tasks with their dependencies and watch patterns.
    List,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
