//! Critical-path resolution over recorded critical-task edges
//!
//! The scheduler simulator (or the ingestor, for the real trace) writes one
//! [`CriticalTaskEdge`] per critical successor of a task: the `sequence`-th task
//! that a given task waited on at a synchronisation point. Starting from the
//! synthetic root (task 0) and following every `critical_child` transitively
//! yields the set of tasks on the critical path.
//!
//! # Algorithm
//!
//! ```text
//! 1. worklist ← [root], visited ← {root}
//! 2. pop task t; for each critical child c of t in sequence order:
//!       c ∈ visited  →  CyclicCriticalPath { task: c, via: t }
//!       otherwise    →  visited ∪= {c}; record c; push c
//! 3. repeat until the worklist is empty
//! ```
//!
//! The traversal is an explicit worklist, never language-level recursion, so it
//! terminates on any input: within a partition the edges must form a tree rooted
//! at the root, and a task reached twice is reported rather than revisited.
//!
//! # Example
//!
//! ```
//! use taskscope::critical_path::{resolve_critical_path, CriticalEdges};
//! use taskscope::task::ROOT_TASK;
//!
//! # fn main() -> taskscope::error::Result<()> {
//! let mut edges = CriticalEdges::new();
//! edges.insert(ROOT_TASK, 0, 5)?;
//! edges.insert(5, 0, 9)?;
//! edges.insert(9, 0, 12)?;
//!
//! let path = resolve_critical_path(&edges, ROOT_TASK)?;
//! assert_eq!(path.tasks, vec![5, 9, 12]);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TraceError};
use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// One recorded critical successor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CriticalTaskEdge {
    pub task_id: TaskId,
    pub sequence: u32,
    pub critical_child: TaskId,
}

/// Critical-task edges of one partition, indexed by task then sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriticalEdges {
    edges: BTreeMap<TaskId, BTreeMap<u32, TaskId>>,
    len: usize,
}

impl CriticalEdges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `critical_child` is the `sequence`-th critical successor of `task_id`
    ///
    /// # Errors
    ///
    /// [`TraceError::DuplicateCriticalEdge`] if `(task_id, sequence)` is already recorded.
    pub fn insert(&mut self, task_id: TaskId, sequence: u32, critical_child: TaskId) -> Result<()> {
        let by_sequence = self.edges.entry(task_id).or_default();
        if by_sequence.contains_key(&sequence) {
            return Err(TraceError::DuplicateCriticalEdge {
                task: task_id,
                sequence,
            });
        }
        by_sequence.insert(sequence, critical_child);
        self.len += 1;
        Ok(())
    }

    /// Critical successors of `task_id` ordered by sequence
    pub fn critical_children(&self, task_id: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task_id)
            .map(|by_sequence| by_sequence.values().copied().collect())
            .unwrap_or_default()
    }

    /// Every edge ordered by `(task_id, sequence)`
    pub fn iter(&self) -> impl Iterator<Item = CriticalTaskEdge> + '_ {
        self.edges.iter().flat_map(|(&task_id, by_sequence)| {
            by_sequence
                .iter()
                .map(move |(&sequence, &critical_child)| CriticalTaskEdge {
                    task_id,
                    sequence,
                    critical_child,
                })
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Tasks reachable from a root along critical edges
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalPath {
    /// Root the traversal started from (not itself included)
    pub root: TaskId,
    /// Critical tasks, ascending by id
    pub tasks: Vec<TaskId>,
    /// Critical tasks in the order the traversal first reached them
    pub discovery_order: Vec<TaskId>,
}

impl CriticalPath {
    /// Check if a specific task is on the critical path
    pub fn is_on_critical_path(&self, task: TaskId) -> bool {
        self.tasks.binary_search(&task).is_ok()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Resolve every task reachable from `root` along critical edges
///
/// # Errors
///
/// [`TraceError::CyclicCriticalPath`] if any task is reached twice.
pub fn resolve_critical_path(edges: &CriticalEdges, root: TaskId) -> Result<CriticalPath> {
    let mut visited = HashSet::from([root]);
    let mut worklist = VecDeque::from([root]);
    let mut discovery_order = Vec::new();

    while let Some(task) = worklist.pop_front() {
        for child in edges.critical_children(task) {
            if !visited.insert(child) {
                tracing::warn!(task = child, via = task, "critical path revisits a task");
                return Err(TraceError::CyclicCriticalPath { task: child, via: task });
            }
            discovery_order.push(child);
            worklist.push_back(child);
        }
    }

    let mut tasks = discovery_order.clone();
    tasks.sort_unstable();

    Ok(CriticalPath {
        root,
        tasks,
        discovery_order,
    })
}
