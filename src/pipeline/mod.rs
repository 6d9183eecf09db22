// src/pipeline/mod.rs

//! Asset pipelines: glob resolution, transformation stages and the runner
//! that ties them together.

pub mod hash;
pub mod matcher;
pub mod runner;
pub mod stage;

pub use hash::{open_hash_store, HashKey, HashRecord, HashStore, SharedHashStore};
pub use matcher::{FileSet, PathPattern};
pub use runner::{PipelineReport, PipelineRunner};
pub use stage::{Asset, Stage, StageContext, StageFailure};
