//! Read-only reducers over finalized task rows
//!
//! Tasks compiled from the same annotation share a label and the same create,
//! start and end locations. These reducers count tasks per such attribute tuple,
//! and count parent/child links per pair of tuples. Before finalization the
//! location fields are still unset, so every task of a label collapses into one
//! group; the counts are degenerate but still valid.

use crate::interner::Interner;
use crate::registry::TaskRegistry;
use crate::task::{TaskAttributeKey, TaskAttributes, TaskId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Number of tasks sharing one attribute tuple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskTypeCount {
    pub attributes: TaskAttributes,
    pub count: usize,
}

/// Number of distinct children of one attribute tuple under parents of another
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentChildCount {
    pub parent: TaskAttributes,
    pub child: TaskAttributes,
    pub count: usize,
}

/// Resolve an interned attribute tuple into strings and locations
pub fn resolve_attributes(interner: &Interner, key: &TaskAttributeKey) -> TaskAttributes {
    TaskAttributes {
        label: key
            .label
            .and_then(|id| interner.resolve(id))
            .map(|s| s.to_string()),
        create_location: key
            .create_location
            .and_then(|id| interner.resolve_location(id)),
        start_location: key
            .start_location
            .and_then(|id| interner.resolve_location(id)),
        end_location: key
            .end_location
            .and_then(|id| interner.resolve_location(id)),
    }
}

/// Count tasks per interned attribute tuple
pub fn task_counts_by_key(registry: &TaskRegistry) -> BTreeMap<TaskAttributeKey, usize> {
    let mut counts = BTreeMap::new();
    for task in registry.tasks() {
        *counts.entry(task.attribute_key()).or_insert(0) += 1;
    }
    counts
}

/// Count distinct children per `(parent tuple, child tuple)`
pub fn child_counts_by_key(
    registry: &TaskRegistry,
) -> BTreeMap<(TaskAttributeKey, TaskAttributeKey), usize> {
    let mut children: BTreeMap<(TaskAttributeKey, TaskAttributeKey), BTreeSet<TaskId>> =
        BTreeMap::new();

    for relation in registry.relations() {
        let (Some(parent), Some(child)) = (
            registry.get(relation.parent_id),
            registry.get(relation.child_id),
        ) else {
            continue;
        };
        children
            .entry((parent.attribute_key(), child.attribute_key()))
            .or_default()
            .insert(child.id);
    }

    children
        .into_iter()
        .map(|(key, ids)| (key, ids.len()))
        .collect()
}

/// Count tasks grouped by `(label, create, start, end location)`
pub fn count_tasks_by_attributes(registry: &TaskRegistry, interner: &Interner) -> Vec<TaskTypeCount> {
    task_counts_by_key(registry)
        .into_iter()
        .map(|(key, count)| TaskTypeCount {
            attributes: resolve_attributes(interner, &key),
            count,
        })
        .collect()
}

/// Count distinct children grouped by parent and child attributes
pub fn count_children_by_parent_attributes(
    registry: &TaskRegistry,
    interner: &Interner,
) -> Vec<ParentChildCount> {
    child_counts_by_key(registry)
        .into_iter()
        .map(|((parent, child), count)| ParentChildCount {
            parent: resolve_attributes(interner, &parent),
            child: resolve_attributes(interner, &child),
            count,
        })
        .collect()
}
