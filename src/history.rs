//! Append-only task history logs
//!
//! A [`HistoryLog`] holds the lifecycle events of every task for exactly one
//! partition: the real trace, or one simulated schedule. Events are appended by a
//! single writer; each receives a `writer_stream_position` recording the order in
//! which the writer produced it. Wall-clock time alone is not unique across
//! concurrent observers, so the position breaks ties between equal timestamps.
//!
//! CREATE, START and END are unique per task. A second occurrence is rejected with
//! [`TraceError::DuplicateUniqueAction`]; interval reconstruction relies on it.
//! SUSPEND and RESUME may recur, and each SUSPEND may carry one
//! [`SuspendMetadata`] record describing what it waits for.

use crate::error::{Result, TraceError};
use crate::interner::LocationId;
use crate::task::{SimId, TaskId};
use crate::time::Ticks;
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle event
///
/// Numeric codes match the persisted task history schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    Create = 1,
    Start = 2,
    End = 3,
    Suspend = 4,
    Resume = 5,
}

impl Action {
    /// Whether the action may occur at most once per task
    pub fn is_unique(self) -> bool {
        matches!(self, Action::Create | Action::Start | Action::End)
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            1 => Ok(Action::Create),
            2 => Ok(Action::Start),
            3 => Ok(Action::End),
            4 => Ok(Action::Suspend),
            5 => Ok(Action::Resume),
            other => Err(format!("unknown task action code {}", other)),
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        action.code()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "CREATE",
            Action::Start => "START",
            Action::End => "END",
            Action::Suspend => "SUSPEND",
            Action::Resume => "RESUME",
        };
        f.write_str(name)
    }
}

/// Physical placement of the thread that recorded an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub cpu: u32,
    pub thread_id: u64,
}

impl ExecutionContext {
    pub fn new(cpu: u32, thread_id: u64) -> Self {
        Self { cpu, thread_id }
    }
}

/// One lifecycle event of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub task_id: TaskId,
    pub action: Action,
    pub time: Ticks,
    pub location_id: LocationId,
    /// Absent for simplified simulated schedules
    pub context: Option<ExecutionContext>,
    pub writer_stream_position: u64,
}

impl HistoryEvent {
    /// Sort key: time first, then order within the writer's stream
    pub fn order_key(&self) -> (Ticks, u64) {
        (self.time, self.writer_stream_position)
    }
}

/// What a suspended task waits for before it may resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Direct children only (taskwait)
    Children,
    /// All descendants (taskgroup)
    Descendants,
    /// No synchronisation; the task merely yields
    Yield,
}

impl SyncMode {
    pub fn from_flag(sync_descendants: bool) -> Self {
        if sync_descendants {
            SyncMode::Descendants
        } else {
            SyncMode::Children
        }
    }
}

/// Metadata attached to a SUSPEND event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendMetadata {
    pub task_id: TaskId,
    pub time: Ticks,
    pub mode: SyncMode,
}

impl SuspendMetadata {
    /// Whether the suspension waits for all descendants to complete
    pub fn sync_descendants(&self) -> bool {
        self.mode == SyncMode::Descendants
    }
}

/// Partition a log belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogScope {
    /// The recorded trace
    Real,
    /// A simulated schedule
    Simulation(SimId),
}

impl LogScope {
    pub fn sim_id(self) -> Option<SimId> {
        match self {
            LogScope::Real => None,
            LogScope::Simulation(id) => Some(id),
        }
    }
}

impl fmt::Display for LogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogScope::Real => write!(f, "real trace"),
            LogScope::Simulation(id) => write!(f, "simulation {}", id),
        }
    }
}

/// Append-only event log for one partition
#[derive(Debug, Clone)]
pub struct HistoryLog {
    scope: LogScope,
    events: Vec<HistoryEvent>,
    by_task: FnvHashMap<TaskId, Vec<usize>>,
    unique: FnvHashMap<(TaskId, Action), usize>,
    suspend_meta: Vec<SuspendMetadata>,
    suspend_meta_keys: FnvHashSet<(TaskId, Ticks)>,
}

impl HistoryLog {
    /// Create an empty log for `scope`
    pub fn new(scope: LogScope) -> Self {
        Self {
            scope,
            events: Vec::new(),
            by_task: FnvHashMap::default(),
            unique: FnvHashMap::default(),
            suspend_meta: Vec::new(),
            suspend_meta_keys: FnvHashSet::default(),
        }
    }

    pub fn scope(&self) -> LogScope {
        self.scope
    }

    /// Append an event, returning its writer stream position
    ///
    /// # Errors
    ///
    /// [`TraceError::DuplicateUniqueAction`] if `action` is CREATE, START or END
    /// and the task already has one. The log is left unchanged.
    pub fn append(
        &mut self,
        task_id: TaskId,
        action: Action,
        time: Ticks,
        location_id: LocationId,
        context: Option<ExecutionContext>,
    ) -> Result<u64> {
        let index = self.events.len();
        if action.is_unique() {
            if self.unique.contains_key(&(task_id, action)) {
                return Err(TraceError::DuplicateUniqueAction {
                    task: task_id,
                    action,
                });
            }
            self.unique.insert((task_id, action), index);
        }

        let position = index as u64;
        self.events.push(HistoryEvent {
            task_id,
            action,
            time,
            location_id,
            context,
            writer_stream_position: position,
        });
        self.by_task.entry(task_id).or_default().push(index);
        Ok(position)
    }

    /// Attach metadata to the SUSPEND event of `task_id` at `time`
    ///
    /// # Errors
    ///
    /// - [`TraceError::UnknownSuspend`] if no such SUSPEND event was appended
    /// - [`TraceError::DuplicateSuspendMeta`] if that SUSPEND already has metadata
    pub fn append_suspend_meta(&mut self, task_id: TaskId, time: Ticks, mode: SyncMode) -> Result<()> {
        let has_suspend = self.indices(task_id).iter().any(|&i| {
            let event = &self.events[i];
            event.action == Action::Suspend && event.time == time
        });
        if !has_suspend {
            return Err(TraceError::UnknownSuspend {
                task: task_id,
                time,
            });
        }
        if !self.suspend_meta_keys.insert((task_id, time)) {
            return Err(TraceError::DuplicateSuspendMeta {
                task: task_id,
                time,
            });
        }
        self.suspend_meta.push(SuspendMetadata {
            task_id,
            time,
            mode,
        });
        Ok(())
    }

    fn indices(&self, task_id: TaskId) -> &[usize] {
        self.by_task.get(&task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Events of one task ordered by `(time, writer_stream_position)`
    pub fn events_for(&self, task_id: TaskId) -> Vec<&HistoryEvent> {
        let mut events: Vec<&HistoryEvent> =
            self.indices(task_id).iter().map(|&i| &self.events[i]).collect();
        events.sort_by_key(|e| e.order_key());
        events
    }

    /// The single CREATE, START or END event of a task
    pub fn unique_event(&self, task_id: TaskId, action: Action) -> Option<&HistoryEvent> {
        self.unique
            .get(&(task_id, action))
            .map(|&i| &self.events[i])
    }

    /// Suspend metadata of one task ordered by time
    pub fn suspend_meta_for(&self, task_id: TaskId) -> Vec<SuspendMetadata> {
        let mut meta: Vec<SuspendMetadata> = self
            .suspend_meta
            .iter()
            .filter(|m| m.task_id == task_id)
            .copied()
            .collect();
        meta.sort_by_key(|m| m.time);
        meta
    }

    /// Every event in append order
    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// Every suspend metadata record in append order
    pub fn suspend_meta(&self) -> &[SuspendMetadata] {
        &self.suspend_meta
    }

    /// Tasks with at least one event, ascending
    pub fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.by_task.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOC: LocationId = LocationId(0);

    #[test]
    fn test_action_codes_roundtrip() {
        for action in [
            Action::Create,
            Action::Start,
            Action::End,
            Action::Suspend,
            Action::Resume,
        ] {
            assert_eq!(Action::try_from(action.code()), Ok(action));
        }
        assert!(Action::try_from(0).is_err());
        assert!(Action::try_from(6).is_err());
    }

    #[test]
    fn test_action_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Action::Suspend).unwrap(), "4");
        let action: Action = serde_json::from_str("2").unwrap();
        assert_eq!(action, Action::Start);
    }

    #[test]
    fn test_duplicate_unique_action_rejected() {
        let mut log = HistoryLog::new(LogScope::Real);
        log.append(1, Action::Create, Ticks(0), LOC, None).unwrap();
        log.append(1, Action::Start, Ticks(5), LOC, None).unwrap();

        let err = log.append(1, Action::Start, Ticks(6), LOC, None).unwrap_err();
        assert_eq!(
            err,
            TraceError::DuplicateUniqueAction {
                task: 1,
                action: Action::Start
            }
        );
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_unique_actions_are_per_task() {
        let mut log = HistoryLog::new(LogScope::Real);
        log.append(1, Action::Create, Ticks(0), LOC, None).unwrap();
        log.append(2, Action::Create, Ticks(0), LOC, None).unwrap();
        assert_eq!(log.task_ids(), vec![1, 2]);
    }

    #[test]
    fn test_suspend_resume_may_repeat() {
        let mut log = HistoryLog::new(LogScope::Real);
        for t in 0..5 {
            log.append(1, Action::Suspend, Ticks(t * 10), LOC, None).unwrap();
            log.append(1, Action::Resume, Ticks(t * 10 + 5), LOC, None).unwrap();
        }
        assert_eq!(log.events_for(1).len(), 10);
    }

    #[test]
    fn test_events_ordered_by_time_then_position() {
        let mut log = HistoryLog::new(LogScope::Real);
        log.append(1, Action::End, Ticks(100), LOC, None).unwrap();
        log.append(1, Action::Suspend, Ticks(20), LOC, None).unwrap();
        log.append(1, Action::Resume, Ticks(20), LOC, None).unwrap();
        log.append(1, Action::Create, Ticks(9), LOC, None).unwrap();

        let actions: Vec<Action> = log.events_for(1).iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![Action::Create, Action::Suspend, Action::Resume, Action::End]
        );
    }

    #[test]
    fn test_writer_positions_are_sequential() {
        let mut log = HistoryLog::new(LogScope::Simulation(2));
        assert_eq!(log.append(4, Action::Create, Ticks(0), LOC, None).unwrap(), 0);
        assert_eq!(log.append(5, Action::Create, Ticks(0), LOC, None).unwrap(), 1);
        assert_eq!(log.scope().sim_id(), Some(2));
    }

    #[test]
    fn test_suspend_meta_requires_suspend_event() {
        let mut log = HistoryLog::new(LogScope::Real);
        let err = log
            .append_suspend_meta(1, Ticks(20), SyncMode::Children)
            .unwrap_err();
        assert_eq!(
            err,
            TraceError::UnknownSuspend {
                task: 1,
                time: Ticks(20)
            }
        );

        log.append(1, Action::Suspend, Ticks(20), LOC, None).unwrap();
        log.append_suspend_meta(1, Ticks(20), SyncMode::Descendants)
            .unwrap();
        assert!(matches!(
            log.append_suspend_meta(1, Ticks(20), SyncMode::Children),
            Err(TraceError::DuplicateSuspendMeta { .. })
        ));

        let meta = log.suspend_meta_for(1);
        assert_eq!(meta.len(), 1);
        assert!(meta[0].sync_descendants());
    }

    #[test]
    fn test_unique_event_lookup() {
        let mut log = HistoryLog::new(LogScope::Real);
        log.append(3, Action::Start, Ticks(10), LocationId(7), None)
            .unwrap();
        let start = log.unique_event(3, Action::Start).unwrap();
        assert_eq!(start.location_id, LocationId(7));
        assert!(log.unique_event(3, Action::End).is_none());
    }

    #[test]
    fn test_sync_mode_from_flag() {
        assert_eq!(SyncMode::from_flag(true), SyncMode::Descendants);
        assert_eq!(SyncMode::from_flag(false), SyncMode::Children);
    }
}
