//! Task registry: task rows and the parent/child hierarchy
//!
//! Tasks are registered as their CREATE events are ingested. The derived fields
//! of each row (`num_children`, create/start/end timestamps and locations) are
//! filled in by [`TaskRegistry::finalize`], a one-shot batch pass over the
//! relation table and the real-trace [`HistoryLog`]. Running it again reproduces
//! the same values.

use crate::error::{Result, TraceError};
use crate::history::{Action, HistoryLog};
use crate::interner::StringId;
use crate::task::{Task, TaskId, TaskRelation};
use crate::time::Ticks;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Outcome of a finalization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Number of task rows finalized
    pub tasks: usize,
    /// Number of parent/child relations counted
    pub relations: usize,
    /// One [`TraceError::IncompleteTask`] per task missing CREATE, START or END
    pub incomplete: Vec<TraceError>,
}

impl FinalizeReport {
    /// True when every task has all three unique events
    pub fn is_clean(&self) -> bool {
        self.incomplete.is_empty()
    }

    /// Ids of the tasks flagged incomplete, ascending
    pub fn incomplete_task_ids(&self) -> Vec<TaskId> {
        self.incomplete
            .iter()
            .filter_map(|e| match e {
                TraceError::IncompleteTask { task, .. } => Some(*task),
                _ => None,
            })
            .collect()
    }
}

/// Owner of all task rows and hierarchy edges
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
    relations: BTreeSet<TaskRelation>,
    children: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, returning `true` if a new row was created
    ///
    /// Registering the same `(id, parent, label)` again is a no-op.
    ///
    /// # Errors
    ///
    /// [`TraceError::DuplicateTask`] if `id` exists with a different parent or label.
    pub fn register_task(
        &mut self,
        id: TaskId,
        parent_id: Option<TaskId>,
        label_id: Option<StringId>,
    ) -> Result<bool> {
        if let Some(existing) = self.tasks.get(&id) {
            if existing.parent_id == parent_id && existing.label_id == label_id {
                return Ok(false);
            }
            return Err(TraceError::DuplicateTask { task: id });
        }
        self.tasks.insert(id, Task::new(id, parent_id, label_id));
        Ok(true)
    }

    /// Record a parent/child edge, returning `true` if it is new
    ///
    /// # Errors
    ///
    /// - [`TraceError::UnknownTask`] if either endpoint is unregistered
    /// - [`TraceError::ParentMismatch`] if the child declares a different parent
    pub fn add_relation(&mut self, parent_id: TaskId, child_id: TaskId) -> Result<bool> {
        if !self.tasks.contains_key(&parent_id) {
            return Err(TraceError::UnknownTask { task: parent_id });
        }
        let child = self
            .tasks
            .get(&child_id)
            .ok_or(TraceError::UnknownTask { task: child_id })?;
        if child.parent_id != Some(parent_id) {
            return Err(TraceError::ParentMismatch {
                task: child_id,
                declared: child.parent_id,
                relation: parent_id,
            });
        }

        let relation = TaskRelation {
            parent_id,
            child_id,
        };
        if !self.relations.insert(relation) {
            return Ok(false);
        }
        self.children.entry(parent_id).or_default().insert(child_id);
        Ok(true)
    }

    /// Derive `num_children` and the lifecycle fields of every task from `log`
    pub fn finalize(&mut self, log: &HistoryLog) -> FinalizeReport {
        let mut incomplete = Vec::new();

        for (id, task) in self.tasks.iter_mut() {
            task.num_children = self.children.get(id).map_or(0, BTreeSet::len);

            let create = log.unique_event(*id, Action::Create);
            let start = log.unique_event(*id, Action::Start);
            let end = log.unique_event(*id, Action::End);

            task.create_ts = create.map(|e| e.time);
            task.create_location_id = create.map(|e| e.location_id);
            task.start_ts = start.map(|e| e.time);
            task.start_location_id = start.map(|e| e.location_id);
            task.end_ts = end.map(|e| e.time);
            task.end_location_id = end.map(|e| e.location_id);

            let missing: Vec<Action> = [(Action::Create, create), (Action::Start, start), (Action::End, end)]
                .into_iter()
                .filter(|(_, event)| event.is_none())
                .map(|(action, _)| action)
                .collect();
            if !missing.is_empty() {
                incomplete.push(TraceError::IncompleteTask { task: *id, missing });
            }
        }

        FinalizeReport {
            tasks: self.tasks.len(),
            relations: self.relations.len(),
            incomplete,
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// All task rows, ascending by id
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// All relations, ordered by `(parent, child)`
    pub fn relations(&self) -> impl Iterator<Item = &TaskRelation> {
        self.relations.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Tasks without a parent
    pub fn root_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.parent_id.is_none())
            .map(|t| t.id)
            .collect()
    }

    /// Direct children of `parent`, ascending
    pub fn children_of(&self, parent: TaskId) -> Vec<TaskId> {
        self.children
            .get(&parent)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ancestors of `task`, nearest first
    pub fn ancestors_of(&self, task: TaskId) -> Vec<TaskId> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([task]);
        let mut current = self.tasks.get(&task).and_then(|t| t.parent_id);

        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            ancestors.push(parent);
            current = self.tasks.get(&parent).and_then(|t| t.parent_id);
        }
        ancestors
    }

    /// Descendants of `task` in breadth-first order
    pub fn descendants_of(&self, task: TaskId) -> Vec<TaskId> {
        let mut descendants = Vec::new();
        let mut seen = HashSet::from([task]);
        let mut queue = VecDeque::from([task]);

        while let Some(current) = queue.pop_front() {
            for child in self.children_of(current) {
                if seen.insert(child) {
                    descendants.push(child);
                    queue.push_back(child);
                }
            }
        }
        descendants
    }

    /// Children of `parent` created within `[start, end]`, ordered by create time
    ///
    /// Depends on finalized create timestamps; children without one are skipped.
    pub fn children_created_between(
        &self,
        parent: TaskId,
        start: Ticks,
        end: Ticks,
    ) -> Vec<(TaskId, Ticks)> {
        let mut children: Vec<(TaskId, Ticks)> = self
            .children_of(parent)
            .into_iter()
            .filter_map(|id| {
                let created = self.tasks.get(&id)?.create_ts?;
                created.within(start, end).then_some((id, created))
            })
            .collect();
        children.sort_by_key(|&(id, created)| (created, id));
        children
    }
}
