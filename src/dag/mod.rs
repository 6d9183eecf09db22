// src/dag/mod.rs

//! Task graph: definitions, the registry and execution planning.
//!
//! - [`task`] defines [`Task`], the [`TaskWork`] seam and output claims.
//! - [`registry`] owns every task and rejects cycles at registration time.
//! - [`plan`] expands requested tasks into batches (Kahn's algorithm).

pub mod plan;
pub mod registry;
pub mod task;

pub use plan::{plan, ExecutionPlan};
pub use registry::TaskRegistry;
pub use task::{OutputClaim, Task, TaskContext, TaskWork, WorkFuture};
