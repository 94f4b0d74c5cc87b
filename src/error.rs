//! Error taxonomy for the trace store
//!
//! Structural violations during ingestion (duplicate or unknown references) are
//! returned as `Err` and abort that ingestion batch. Interval and path level
//! violations are returned per task inside batch query results, and incomplete
//! tasks are listed in the finalization report instead of failing it.

use crate::history::Action;
use crate::task::{SimId, TaskId};
use crate::time::Ticks;
use thiserror::Error;

/// Errors raised by the trace store and its analysis passes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("task {task} already registered with a different identity")]
    DuplicateTask { task: TaskId },

    #[error("task {task} already has a {action} event")]
    DuplicateUniqueAction { task: TaskId, action: Action },

    #[error("unknown task {task}")]
    UnknownTask { task: TaskId },

    #[error("task {task} declares parent {declared:?} but relation names parent {relation}")]
    ParentMismatch {
        task: TaskId,
        declared: Option<TaskId>,
        relation: TaskId,
    },

    #[error("malformed interval for task {task}: {from} at {start} precedes {to} at {end}")]
    MalformedInterval {
        task: TaskId,
        from: Action,
        to: Action,
        start: Ticks,
        end: Ticks,
    },

    #[error("task {task} is incomplete: missing {missing:?}")]
    IncompleteTask { task: TaskId, missing: Vec<Action> },

    #[error("critical path revisits task {task} (reached again from {via})")]
    CyclicCriticalPath { task: TaskId, via: TaskId },

    #[error("critical edge ({task}, sequence {sequence}) already recorded")]
    DuplicateCriticalEdge { task: TaskId, sequence: u32 },

    #[error("no SUSPEND event for task {task} at {time}")]
    UnknownSuspend { task: TaskId, time: Ticks },

    #[error("suspend metadata for task {task} at {time} already recorded")]
    DuplicateSuspendMeta { task: TaskId, time: Ticks },

    #[error("unknown simulation {sim_id}")]
    UnknownSimulation { sim_id: SimId },

    #[error("simulation {sim_id} already attached")]
    DuplicateSimulation { sim_id: SimId },

    #[error("store is finalized; writes are rejected")]
    StoreFinalized,

    #[error("store is not finalized yet")]
    NotFinalized,

    #[error("invalid timestamp {0:?}: expected an unsigned integer tick count")]
    InvalidTimestamp(String),

    #[error("unknown string id {0}")]
    UnknownString(u32),

    #[error("unknown source location id {0}")]
    UnknownLocation(u32),
}

/// Result type for trace store operations
pub type Result<T> = std::result::Result<T, TraceError>;
