// src/pipeline/runner.rs

//! Read → stages → write for one task invocation.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{AssetdagError, Result};
use crate::fs::FileSystem;
use crate::pipeline::hash::SharedHashStore;
use crate::pipeline::matcher::FileSet;
use crate::pipeline::stage::{Asset, Stage, StageContext};

/// What a pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Number of source files read.
    pub read: usize,
    /// Files written, absolute, in write order.
    pub written: Vec<PathBuf>,
}

/// Runs a task's stage list over a resolved file set.
pub struct PipelineRunner<'a> {
    fs: &'a dyn FileSystem,
    hashes: Option<SharedHashStore>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(fs: &'a dyn FileSystem, hashes: Option<SharedHashStore>) -> Self {
        Self { fs, hashes }
    }

    /// Read every file of `inputs`, push the assets through `stages` in
    /// order and write the results under `destination`.
    ///
    /// The first failure aborts the run. Nothing is written when a stage
    /// fails, and incremental hashes are only recorded after every write
    /// succeeded.
    pub fn run(
        &self,
        task: &str,
        inputs: &FileSet,
        stages: &[Box<dyn Stage>],
        destination: &Path,
    ) -> Result<PipelineReport> {
        let mut assets = Vec::with_capacity(inputs.len());
        for path in inputs.paths() {
            let contents = self.fs.read(path).map_err(|source| AssetdagError::Stage {
                task: task.to_string(),
                stage: "read".to_string(),
                path: path.clone(),
                source,
            })?;
            assets.push(Asset::new(path.clone(), inputs.relative(path), contents));
        }
        let read = assets.len();

        let ctx = StageContext::new(task, self.hashes.clone()).with_fs(self.fs);
        for stage in stages {
            let before = assets.len();
            assets = stage
                .apply(&ctx, assets)
                .map_err(|failure| AssetdagError::Stage {
                    task: task.to_string(),
                    stage: stage.name().to_string(),
                    path: failure.path,
                    source: failure.cause,
                })?;
            debug!(task, stage = stage.name(), before, after = assets.len(), "stage applied");
        }

        let mut written = Vec::with_capacity(assets.len());
        let mut outputs = Vec::with_capacity(assets.len());
        for asset in assets {
            let target = destination.join(&asset.rel_path);
            self.fs
                .write(&target, &asset.contents)
                .map_err(|source| AssetdagError::Stage {
                    task: task.to_string(),
                    stage: "write".to_string(),
                    path: target.clone(),
                    source,
                })?;
            outputs.push((asset.source, target.clone()));
            written.push(target);
        }

        ctx.commit_hashes(&outputs)?;

        info!(task, read, written = written.len(), dest = ?destination, "pipeline finished");
        Ok(PipelineReport { read, written })
    }
}
