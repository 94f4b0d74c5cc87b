//! Taskscope - trace store and critical-path engine for task-parallel programs
//!
//! This library ingests the lifecycle events of a task-parallel execution
//! (CREATE, START, SUSPEND, RESUME, END per task), reconstructs each task's
//! scheduling states, and resolves the critical path recorded by the runtime or
//! by a scheduler simulator. Simulated schedules live in their own partitions
//! next to the real trace and are queried through the same API.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod critical_path;
pub mod error;
pub mod history;
pub mod interner;
pub mod intervals;
pub mod registry;
pub mod report;
pub mod simulation;
pub mod snapshot;
pub mod store;
pub mod task;
pub mod time;

pub use error::{Result, TraceError};
pub use store::TraceStore;
