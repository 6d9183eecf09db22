// src/exec/mod.rs

//! Running external commands on behalf of tasks.

pub mod process;

pub use process::{spawn, ProcessOutput, ProcessSpec};
