// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetdagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cycle detected in task graph: {0}")]
    Cycle(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{stage}' of task '{task}' failed on {}: {source:#}", path.display())]
    Stage {
        task: String,
        stage: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("process `{command}` exited with {}: {stderr}", code.map_or_else(|| "no exit code".to_string(), |c| format!("code {c}")))]
    Process {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AssetdagError {
    /// Wrap an `std::io::Error` together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssetdagError::Io {
            path: path.into(),
            source,
        }
    }

    /// Configuration and graph errors abort before any work starts.
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, AssetdagError::Config(_) | AssetdagError::Cycle(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AssetdagError>;
