//! Simulated schedule partitions
//!
//! A scheduler simulator replays a finalized trace under a different policy and
//! emits its own lifecycle events and critical edges. Each run is a partition
//! tagged with a simulation id: it owns its history log and critical edges,
//! shares the task registry and interner of the real trace, and never sees rows
//! of another partition.
//!
//! Builders borrow the store immutably, so several simulations can be ingested
//! on separate threads and attached once they are finished:
//!
//! ```
//! use taskscope::history::Action;
//! use taskscope::store::TraceStore;
//! use taskscope::time::Ticks;
//!
//! # fn main() -> taskscope::error::Result<()> {
//! let mut store = TraceStore::new();
//! let loc = store.intern_location("main.c", "work", 7)?;
//! store.register_task(5, None, None)?;
//! store.finalize();
//!
//! let partitions = std::thread::scope(|s| {
//!     let handles: Vec<_> = (0..2)
//!         .map(|sim_id| {
//!             let store = &store;
//!             s.spawn(move || -> taskscope::error::Result<_> {
//!                 let mut sim = store.simulation_builder(sim_id)?;
//!                 sim.append_event(5, Action::Start, Ticks(u64::from(sim_id)), loc, None)?;
//!                 sim.add_critical_edge(0, 0, 5)?;
//!                 Ok(sim.finish())
//!             })
//!         })
//!         .collect();
//!     handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
//! });
//! for partition in partitions {
//!     store.attach_simulation(partition?)?;
//! }
//! assert_eq!(store.simulation_ids(), vec![0, 1]);
//! # Ok(())
//! # }
//! ```

use crate::config::StoreConfig;
use crate::critical_path::CriticalEdges;
use crate::error::{Result, TraceError};
use crate::history::{Action, ExecutionContext, HistoryLog, LogScope, SyncMode};
use crate::interner::{Interner, LocationId};
use crate::registry::TaskRegistry;
use crate::store::{check_critical_edge_refs, check_event_refs};
use crate::task::{SimId, TaskId};
use crate::time::Ticks;

/// Events and critical edges of one simulated schedule
#[derive(Debug, Clone)]
pub struct SimulationPartition {
    sim_id: SimId,
    history: HistoryLog,
    critical: CriticalEdges,
}

impl SimulationPartition {
    pub fn sim_id(&self) -> SimId {
        self.sim_id
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn critical_edges(&self) -> &CriticalEdges {
        &self.critical
    }
}

/// Ingestion handle for one simulation partition
///
/// Validation mirrors the real trace: events and edges must reference tasks of
/// the finalized registry, and unique actions may occur once per task.
#[derive(Debug)]
pub struct SimulationBuilder<'a> {
    registry: &'a TaskRegistry,
    interner: &'a Interner,
    config: &'a StoreConfig,
    partition: SimulationPartition,
}

impl<'a> SimulationBuilder<'a> {
    pub(crate) fn new(
        sim_id: SimId,
        registry: &'a TaskRegistry,
        interner: &'a Interner,
        config: &'a StoreConfig,
    ) -> Self {
        Self {
            registry,
            interner,
            config,
            partition: SimulationPartition {
                sim_id,
                history: HistoryLog::new(LogScope::Simulation(sim_id)),
                critical: CriticalEdges::new(),
            },
        }
    }

    pub fn sim_id(&self) -> SimId {
        self.partition.sim_id
    }

    /// Append a simulated lifecycle event
    pub fn append_event(
        &mut self,
        task_id: TaskId,
        action: Action,
        time: Ticks,
        location_id: LocationId,
        context: Option<ExecutionContext>,
    ) -> Result<u64> {
        check_event_refs(self.registry, self.interner, task_id, location_id)?;
        self.partition
            .history
            .append(task_id, action, time, location_id, context)
    }

    /// Attach metadata to a simulated SUSPEND event
    pub fn append_suspend_meta(&mut self, task_id: TaskId, time: Ticks, mode: SyncMode) -> Result<()> {
        if !self.registry.contains(task_id) {
            return Err(TraceError::UnknownTask { task: task_id });
        }
        self.partition.history.append_suspend_meta(task_id, time, mode)
    }

    /// Record a critical edge of this simulation
    pub fn add_critical_edge(&mut self, task_id: TaskId, sequence: u32, critical_child: TaskId) -> Result<()> {
        check_critical_edge_refs(self.registry, self.config, task_id, critical_child)?;
        self.partition.critical.insert(task_id, sequence, critical_child)
    }

    /// Close the builder, releasing the borrow of the store
    pub fn finish(self) -> SimulationPartition {
        tracing::debug!(
            sim_id = self.partition.sim_id,
            events = self.partition.history.len(),
            critical_edges = self.partition.critical.len(),
            "simulation built"
        );
        self.partition
    }
}
