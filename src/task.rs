//! Task rows, hierarchy edges and the attributes used for grouping

use crate::interner::{LocationId, SourceLocation, StringId};
use crate::time::Ticks;
use serde::{Deserialize, Serialize};

/// Task identifier as assigned by the traced runtime
pub type TaskId = u64;

/// Simulation partition identifier
pub type SimId = u32;

/// Synthetic root of every critical path
pub const ROOT_TASK: TaskId = 0;

/// One row of the task table
///
/// `num_children` and the timestamp/location triples are derived by
/// finalization; they are `None`/zero until then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub num_children: usize,
    pub label_id: Option<StringId>,
    pub create_ts: Option<Ticks>,
    pub start_ts: Option<Ticks>,
    pub end_ts: Option<Ticks>,
    pub create_location_id: Option<LocationId>,
    pub start_location_id: Option<LocationId>,
    pub end_location_id: Option<LocationId>,
}

impl Task {
    /// Fresh, unfinalized task row
    pub fn new(id: TaskId, parent_id: Option<TaskId>, label_id: Option<StringId>) -> Self {
        Self {
            id,
            parent_id,
            num_children: 0,
            label_id,
            create_ts: None,
            start_ts: None,
            end_ts: None,
            create_location_id: None,
            start_location_id: None,
            end_location_id: None,
        }
    }

    /// Whether create, start and end have all been derived
    pub fn is_complete(&self) -> bool {
        self.create_ts.is_some() && self.start_ts.is_some() && self.end_ts.is_some()
    }

    /// Time from start to end, when both are known
    pub fn duration(&self) -> Option<u64> {
        self.start_ts?.duration_until(self.end_ts?)
    }

    /// Grouping key over the task's invariant attributes
    pub fn attribute_key(&self) -> TaskAttributeKey {
        TaskAttributeKey {
            label: self.label_id,
            create_location: self.create_location_id,
            start_location: self.start_location_id,
            end_location: self.end_location_id,
        }
    }
}

/// Parent/child hierarchy edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskRelation {
    pub parent_id: TaskId,
    pub child_id: TaskId,
}

/// Interned attribute tuple: label plus create/start/end locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskAttributeKey {
    pub label: Option<StringId>,
    pub create_location: Option<LocationId>,
    pub start_location: Option<LocationId>,
    pub end_location: Option<LocationId>,
}

/// Resolved task attributes, as shown to analysis consumers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskAttributes {
    pub label: Option<String>,
    pub create_location: Option<SourceLocation>,
    pub start_location: Option<SourceLocation>,
    pub end_location: Option<SourceLocation>,
}

/// A task row together with its resolved attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub attributes: TaskAttributes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_unfinalized() {
        let task = Task::new(5, Some(1), None);
        assert_eq!(task.num_children, 0);
        assert!(!task.is_complete());
        assert_eq!(task.duration(), None);
    }

    #[test]
    fn test_duration_from_start_to_end() {
        let mut task = Task::new(5, None, None);
        task.create_ts = Some(Ticks(0));
        task.start_ts = Some(Ticks(10));
        task.end_ts = Some(Ticks(50));
        assert!(task.is_complete());
        assert_eq!(task.duration(), Some(40));
    }

    #[test]
    fn test_attribute_key_ignores_identity() {
        let a = Task::new(1, None, Some(StringId(3)));
        let b = Task::new(2, Some(1), Some(StringId(3)));
        assert_eq!(a.attribute_key(), b.attribute_key());
    }
}
