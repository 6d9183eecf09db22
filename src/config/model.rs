// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::HashStorageMode;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// debounce_ms = 100
///
/// [paths.scripts]
/// src = "src/**/*.js"
/// dest = "dist/assets/js"
///
/// [task.lint]
/// input = "scripts"
/// cmd = "npx"
/// args = ["jshint", "src"]
///
/// [task.scripts]
/// after = ["lint"]
/// input = "scripts"
/// stages = [{ kind = "concat", file = "all.min.js" }]
/// watch = true
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Named source/destination roles from `[paths.<role>]`.
    #[serde(default)]
    pub paths: BTreeMap<String, PathRole>,

    /// All tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub paths: BTreeMap<String, PathRole>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        paths: BTreeMap<String, PathRole>,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self { config, paths, task }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of tasks running at once; CPU count when unset.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Quiet period before a watch-triggered rebuild starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Where the `changed` stage keeps its content hashes.
    #[serde(default)]
    pub hash_storage_mode: HashStorageMode,
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: None,
            debounce_ms: default_debounce_ms(),
            hash_storage_mode: HashStorageMode::default(),
        }
    }
}

/// One glob or a list of globs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrList::One(s) => vec![s.clone()],
            StringOrList::Many(v) => v.clone(),
        }
    }
}

/// `[paths.<role>]`: where a kind of source lives and where its output goes.
#[derive(Debug, Clone, Deserialize)]
pub struct PathRole {
    /// Globs relative to `base`; entries starting with `!` exclude.
    pub src: StringOrList,

    /// Directory the globs are evaluated in. Defaults to the config directory.
    #[serde(default)]
    pub base: Option<PathBuf>,

    #[serde(default)]
    pub dest: Option<PathBuf>,

    /// Globs (relative to `base`) that trigger the role's tasks in watch
    /// mode. Defaults to `src`.
    #[serde(default)]
    pub watch: Option<StringOrList>,
}

/// `watch = true` or `watch = ["glob", ...]` on a task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WatchSpec {
    Enabled(bool),
    Globs(StringOrList),
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    /// Tasks that must finish before this one starts.
    #[serde(default)]
    pub after: Vec<String>,

    /// Name of a `[paths.<role>]` entry to read from and write to.
    #[serde(default)]
    pub input: Option<String>,

    /// Inline source globs; overrides the role's `src`.
    #[serde(default)]
    pub src: Option<StringOrList>,

    #[serde(default)]
    pub base: Option<PathBuf>,

    #[serde(default)]
    pub dest: Option<PathBuf>,

    /// Transformations applied to the sources, in order.
    #[serde(default)]
    pub stages: Vec<StageSpec>,

    /// External command; runs before the pipeline when both are present.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// `true` watches the task's sources; a list gives explicit globs
    /// relative to the config directory.
    #[serde(default)]
    pub watch: Option<WatchSpec>,

    /// Failures are logged as warnings and do not fail the run.
    #[serde(default)]
    pub allow_failure: bool,
}

impl TaskConfig {
    pub fn has_sources(&self) -> bool {
        self.input.is_some() || self.src.is_some()
    }

    /// Whether the task writes its sources somewhere. A task with a `cmd`,
    /// sources and no stages only uses the sources as watch triggers.
    pub fn runs_pipeline(&self) -> bool {
        !self.stages.is_empty() || (self.has_sources() && self.cmd.is_none())
    }
}

/// A pipeline stage as written in the config, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageSpec {
    Rename {
        #[serde(default)]
        dirname: Option<String>,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        suffix: Option<String>,
        #[serde(default)]
        extension: Option<String>,
    },
    Replace {
        pattern: String,
        with: String,
    },
    Concat {
        file: String,
        #[serde(default = "default_separator")]
        separator: String,
    },
    Header {
        text: String,
    },
    Footer {
        text: String,
    },
    Changed,
    Filter {
        cmd: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
}

fn default_separator() -> String {
    "\n".to_string()
}

impl StageSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            StageSpec::Rename { .. } => "rename",
            StageSpec::Replace { .. } => "replace",
            StageSpec::Concat { .. } => "concat",
            StageSpec::Header { .. } => "header",
            StageSpec::Footer { .. } => "footer",
            StageSpec::Changed => "changed",
            StageSpec::Filter { .. } => "filter",
        }
    }
}
