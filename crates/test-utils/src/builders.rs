#![allow(dead_code)]

use std::path::PathBuf;

use assetdag::config::model::{PathRole, StageSpec, StringOrList, TaskConfig, WatchSpec};
use assetdag::config::{ConfigFile, RawConfigFile};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_role(mut self, name: &str, src: &[&str], dest: Option<&str>) -> Self {
        self.config.paths.insert(
            name.to_string(),
            PathRole {
                src: StringOrList::Many(src.iter().map(|s| s.to_string()).collect()),
                base: None,
                dest: dest.map(PathBuf::from),
                watch: None,
            },
        );
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.config.concurrency = Some(n);
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.config.debounce_ms = ms;
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
#[derive(Default)]
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    /// A task with no work of its own.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn input(mut self, role: &str) -> Self {
        self.task.input = Some(role.to_string());
        self
    }

    pub fn src(mut self, glob: &str) -> Self {
        let globs = match self.task.src.take() {
            Some(existing) => {
                let mut v = existing.to_vec();
                v.push(glob.to_string());
                v
            }
            None => vec![glob.to_string()],
        };
        self.task.src = Some(StringOrList::Many(globs));
        self
    }

    pub fn base(mut self, base: &str) -> Self {
        self.task.base = Some(PathBuf::from(base));
        self
    }

    pub fn dest(mut self, dest: &str) -> Self {
        self.task.dest = Some(PathBuf::from(dest));
        self
    }

    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.task.stages.push(stage);
        self
    }

    pub fn concat(self, file: &str) -> Self {
        self.stage(StageSpec::Concat {
            file: file.to_string(),
            separator: "\n".to_string(),
        })
    }

    pub fn cmd(mut self, cmd: &str, args: &[&str]) -> Self {
        self.task.cmd = Some(cmd.to_string());
        self.task.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn watch_sources(mut self) -> Self {
        self.task.watch = Some(WatchSpec::Enabled(true));
        self
    }

    pub fn watch(mut self, glob: &str) -> Self {
        let globs = match self.task.watch.take() {
            Some(WatchSpec::Globs(existing)) => {
                let mut v = existing.to_vec();
                v.push(glob.to_string());
                v
            }
            _ => vec![glob.to_string()],
        };
        self.task.watch = Some(WatchSpec::Globs(StringOrList::Many(globs)));
        self
    }

    pub fn allow_failure(mut self, val: bool) -> Self {
        self.task.allow_failure = val;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
