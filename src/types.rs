// src/types.rs

use serde::Deserialize;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Mode for storing content hashes used by the `changed` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashStorageMode {
    /// Store hashes in a file (`.assetdag/hashes`) next to the config.
    File,
    /// Store hashes in memory only (lost on restart).
    Memory,
}

impl Default for HashStorageMode {
    fn default() -> Self {
        HashStorageMode::Memory
    }
}
