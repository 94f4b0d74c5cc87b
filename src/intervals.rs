//! Scheduling-state reconstruction
//!
//! A task's discrete lifecycle events are paired into intervals: each adjacent
//! pair `(eᵢ, eᵢ₊₁)` of its time-ordered history becomes one [`SchedulingState`]
//! running from `eᵢ` to `eᵢ₊₁`. The last event (normally END) closes the sequence.
//!
//! ```text
//! CREATE@0   START@10   SUSPEND@20   RESUME@30   END@50
//!    └──────────┘└──────────┘└───────────┘└──────────┘
//!     inactive      active      inactive     active
//! ```
//!
//! Events are ordered by `(time, writer_stream_position)` on integer ticks. The
//! same reconstruction serves the real trace and every simulated partition.
//!
//! A trace whose events run against the lifecycle (START recorded later than END,
//! a RESUME after END, anything before CREATE) cannot be paired meaningfully.
//! Such a task yields [`TraceError::MalformedInterval`] instead of a sequence of
//! intervals.

use crate::error::{Result, TraceError};
use crate::history::{Action, ExecutionContext, HistoryEvent, HistoryLog};
use crate::interner::LocationId;
use crate::task::TaskId;
use crate::time::Ticks;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interval between two consecutive events of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingState {
    pub task_id: TaskId,
    pub action_start: Action,
    pub action_end: Action,
    pub start_ts: Ticks,
    pub end_ts: Ticks,
    pub duration: u64,
    pub start_location_id: LocationId,
    pub end_location_id: LocationId,
    pub start_context: Option<ExecutionContext>,
    pub end_context: Option<ExecutionContext>,
}

impl SchedulingState {
    /// Whether the task was running during this interval
    pub fn is_active(&self) -> bool {
        matches!(self.action_start, Action::Start | Action::Resume)
    }

    fn between(start: &HistoryEvent, end: &HistoryEvent) -> Result<Self> {
        let duration = start
            .time
            .duration_until(end.time)
            .ok_or(TraceError::MalformedInterval {
                task: start.task_id,
                from: start.action,
                to: end.action,
                start: start.time,
                end: end.time,
            })?;

        Ok(Self {
            task_id: start.task_id,
            action_start: start.action,
            action_end: end.action,
            start_ts: start.time,
            end_ts: end.time,
            duration,
            start_location_id: start.location_id,
            end_location_id: end.location_id,
            start_context: start.context,
            end_context: end.context,
        })
    }
}

fn misordered(earlier: &HistoryEvent, later: &HistoryEvent) -> TraceError {
    TraceError::MalformedInterval {
        task: earlier.task_id,
        from: earlier.action,
        to: later.action,
        start: earlier.time,
        end: later.time,
    }
}

// Over the ordered history: CREATE precedes everything, START precedes END,
// and SUSPEND/RESUME fall between START and END
fn check_lifecycle_order(events: &[&HistoryEvent]) -> Result<()> {
    let position = |action: Action| events.iter().position(|e| e.action == action);
    let create = position(Action::Create);
    let start = position(Action::Start);
    let end = position(Action::End);

    for (i, &event) in events.iter().enumerate() {
        if let Some(bound) = create.filter(|&b| i < b) {
            return Err(misordered(events[bound], event));
        }
        let (lower, upper) = match event.action {
            Action::Create | Action::Start => (None, None),
            Action::End => (start, None),
            Action::Suspend | Action::Resume => (start, end),
        };
        if let Some(bound) = lower.filter(|&b| i < b) {
            return Err(misordered(events[bound], event));
        }
        if let Some(bound) = upper.filter(|&b| i > b) {
            return Err(misordered(event, events[bound]));
        }
    }
    Ok(())
}

/// Reconstruct the scheduling states of one task from `log`
///
/// A task with fewer than two events has no intervals.
///
/// # Errors
///
/// [`TraceError::MalformedInterval`] if any event precedes CREATE, END precedes
/// START, or a SUSPEND/RESUME falls outside the START..END window.
pub fn scheduling_states(log: &HistoryLog, task_id: TaskId) -> Result<Vec<SchedulingState>> {
    let events = log.events_for(task_id);
    check_lifecycle_order(&events)?;

    events
        .windows(2)
        .map(|pair| SchedulingState::between(pair[0], pair[1]))
        .collect()
}

/// Reconstruct the scheduling states of several tasks
///
/// A malformed task does not abort the batch; its entry carries the error.
pub fn scheduling_states_for(
    log: &HistoryLog,
    task_ids: &[TaskId],
) -> BTreeMap<TaskId, Result<Vec<SchedulingState>>> {
    task_ids
        .iter()
        .map(|&id| (id, scheduling_states(log, id)))
        .collect()
}

/// One scheduling state of a phase task with the work it spawned meanwhile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseInterval {
    #[serde(flatten)]
    pub state: SchedulingState,
    /// Children created within the interval
    pub children: usize,
    /// Descendants of those children
    pub descendants: usize,
}

/// Total active and inactive time over a sequence of states
pub fn active_inactive_totals(states: &[SchedulingState]) -> (u64, u64) {
    states.iter().fold((0, 0), |(active, inactive), state| {
        if state.is_active() {
            (active + state.duration, inactive)
        } else {
            (active, inactive + state.duration)
        }
    })
}
