// src/config/mod.rs

//! TOML configuration: model, loading, validation and registry building.

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::{build_registry, build_stage};
pub use loader::{config_root_dir, load_and_validate, load_from_path, DEFAULT_CONFIG_FILE};
pub use model::{ConfigFile, RawConfigFile};
