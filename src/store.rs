//! The trace store: ingestion lifecycle and query API
//!
//! A [`TraceStore`] is an explicitly owned object with a two-phase lifecycle:
//!
//! ```text
//! ┌──────────────────────────────┐   finalize()   ┌──────────────────────────────┐
//! │ Ingesting                    │ ─────────────▶ │ Finalized                    │
//! │  register_task / add_relation│                │  reads only; writes rejected │
//! │  append_event / suspend meta │                │  simulations attach here     │
//! │  add_critical_edge           │                │  &TraceStore is Sync         │
//! └──────────────────────────────┘                └──────────────────────────────┘
//! ```
//!
//! Every ingestion call validates its references before touching any table, so a
//! rejected call leaves the store unchanged. Simulated schedules are ingested
//! through [`SimulationBuilder`]s that borrow the finalized store immutably, so
//! several partitions may be built in parallel and attached afterwards.
//!
//! # Example
//!
//! ```
//! use taskscope::history::Action;
//! use taskscope::store::TraceStore;
//! use taskscope::time::Ticks;
//!
//! # fn main() -> taskscope::error::Result<()> {
//! let mut store = TraceStore::new();
//! let loc = store.intern_location("main.c", "compute", 42)?;
//! store.register_task(5, None, Some("compute"))?;
//! store.append_event(5, Action::Create, Ticks(0), loc, None)?;
//! store.append_event(5, Action::Start, Ticks(10), loc, None)?;
//! store.append_event(5, Action::End, Ticks(50), loc, None)?;
//! let report = store.finalize();
//! assert!(report.is_clean());
//!
//! let states = store.get_scheduling_states(&[5], None)?;
//! assert_eq!(states[&5].as_ref().unwrap().len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::aggregate::{self, ParentChildCount, TaskTypeCount};
use crate::config::StoreConfig;
use crate::critical_path::{resolve_critical_path, CriticalEdges, CriticalPath};
use crate::error::{Result, TraceError};
use crate::history::{Action, ExecutionContext, HistoryEvent, HistoryLog, LogScope, SuspendMetadata, SyncMode};
use crate::interner::{Interner, LocationId, SourceLocation, StringId};
use crate::intervals::{self, PhaseInterval, SchedulingState};
use crate::registry::{FinalizeReport, TaskRegistry};
use crate::simulation::{SimulationBuilder, SimulationPartition};
use crate::task::{SimId, TaskId, TaskView};
use crate::time::Ticks;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lifecycle phase of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ingesting,
    Finalized,
}

/// Row counts per table, for summaries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub string: usize,
    pub source_location: usize,
    pub task: usize,
    pub task_relation: usize,
    pub task_history: usize,
    pub task_suspend_meta: usize,
    pub critical_task: usize,
    pub simulations: usize,
    pub sim_task_history: usize,
    pub sim_suspend_meta: usize,
    pub sim_critical_task: usize,
}

/// Row counts of one simulation partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationRowCount {
    pub sim_id: SimId,
    pub sim_task_history: usize,
    pub sim_suspend_meta: usize,
    pub sim_critical_task: usize,
}

impl SimulationRowCount {
    pub fn total(&self) -> usize {
        self.sim_task_history + self.sim_suspend_meta + self.sim_critical_task
    }
}

/// Owner of one trace and all of its simulated schedules
#[derive(Debug)]
pub struct TraceStore {
    config: StoreConfig,
    phase: Phase,
    interner: Interner,
    registry: TaskRegistry,
    history: HistoryLog,
    critical: CriticalEdges,
    simulations: BTreeMap<SimId, SimulationPartition>,
    report: Option<FinalizeReport>,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

// Shared by the store (real trace) and simulation builders (partitions)
pub(crate) fn check_event_refs(
    registry: &TaskRegistry,
    interner: &Interner,
    task_id: TaskId,
    location_id: LocationId,
) -> Result<()> {
    if !registry.contains(task_id) {
        return Err(TraceError::UnknownTask { task: task_id });
    }
    if interner.location_key(location_id).is_none() {
        return Err(TraceError::UnknownLocation(location_id.0));
    }
    Ok(())
}

pub(crate) fn check_critical_edge_refs(
    registry: &TaskRegistry,
    config: &StoreConfig,
    task_id: TaskId,
    critical_child: TaskId,
) -> Result<()> {
    let synthetic_root = task_id == config.root_task && !config.require_registered_root;
    if !synthetic_root && !registry.contains(task_id) {
        return Err(TraceError::UnknownTask { task: task_id });
    }
    if !registry.contains(critical_child) {
        return Err(TraceError::UnknownTask {
            task: critical_child,
        });
    }
    Ok(())
}

impl TraceStore {
    /// Create an empty store with default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with `config`
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            phase: Phase::Ingesting,
            interner: Interner::new(),
            registry: TaskRegistry::new(),
            history: HistoryLog::new(LogScope::Real),
            critical: CriticalEdges::new(),
            simulations: BTreeMap::new(),
            report: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == Phase::Finalized
    }

    fn ensure_ingesting(&self) -> Result<()> {
        match self.phase {
            Phase::Ingesting => Ok(()),
            Phase::Finalized => Err(TraceError::StoreFinalized),
        }
    }

    // ---- ingestion -------------------------------------------------------

    /// Shared interner
    ///
    /// Ingestion workers may intern through this reference concurrently; lookups
    /// and resolution are available in every phase.
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Intern a string (rejected after finalization)
    pub fn intern(&self, text: &str) -> Result<StringId> {
        self.ensure_ingesting()?;
        Ok(self.interner.intern(text))
    }

    /// Intern a source location (rejected after finalization)
    pub fn intern_location(&self, file: &str, func: &str, line: u32) -> Result<LocationId> {
        self.ensure_ingesting()?;
        Ok(self.interner.intern_location(file, func, line))
    }

    /// Register a task on its first CREATE
    ///
    /// With `link_parent_on_register` (the default) a given parent must already be
    /// registered, and the parent/child relation is recorded as well.
    pub fn register_task(
        &mut self,
        id: TaskId,
        parent_id: Option<TaskId>,
        label: Option<&str>,
    ) -> Result<bool> {
        self.ensure_ingesting()?;
        let link_parent = parent_id.filter(|_| self.config.link_parent_on_register);
        if let Some(parent) = link_parent {
            if !self.registry.contains(parent) {
                return Err(TraceError::UnknownTask { task: parent });
            }
        }

        // Reject a conflicting duplicate before the label reaches the string table
        if let Some(existing) = self.registry.get(id) {
            let same_label = match label {
                Some(text) => existing.label_id.is_some() && existing.label_id == self.interner.lookup(text),
                None => existing.label_id.is_none(),
            };
            if !same_label || existing.parent_id != parent_id {
                return Err(TraceError::DuplicateTask { task: id });
            }
        }

        let label_id = label.map(|text| self.interner.intern(text));
        let created = self.registry.register_task(id, parent_id, label_id)?;
        if let Some(parent) = link_parent {
            self.registry.add_relation(parent, id)?;
        }
        Ok(created)
    }

    /// Register a task row by interned label, without linking its parent
    pub(crate) fn register_task_row(
        &mut self,
        id: TaskId,
        parent_id: Option<TaskId>,
        label_id: Option<StringId>,
    ) -> Result<bool> {
        self.ensure_ingesting()?;
        if let Some(label) = label_id {
            if self.interner.resolve(label).is_none() {
                return Err(TraceError::UnknownString(label.0));
            }
        }
        self.registry.register_task(id, parent_id, label_id)
    }

    /// Record a parent/child relation
    pub fn add_relation(&mut self, parent_id: TaskId, child_id: TaskId) -> Result<bool> {
        self.ensure_ingesting()?;
        self.registry.add_relation(parent_id, child_id)
    }

    /// Append a lifecycle event to the real trace
    pub fn append_event(
        &mut self,
        task_id: TaskId,
        action: Action,
        time: Ticks,
        location_id: LocationId,
        context: Option<ExecutionContext>,
    ) -> Result<u64> {
        self.ensure_ingesting()?;
        check_event_refs(&self.registry, &self.interner, task_id, location_id)?;
        self.history.append(task_id, action, time, location_id, context)
    }

    /// Attach metadata to a SUSPEND event of the real trace
    pub fn append_suspend_meta(&mut self, task_id: TaskId, time: Ticks, mode: SyncMode) -> Result<()> {
        self.ensure_ingesting()?;
        if !self.registry.contains(task_id) {
            return Err(TraceError::UnknownTask { task: task_id });
        }
        self.history.append_suspend_meta(task_id, time, mode)
    }

    /// Record a critical edge of the unpartitioned baseline
    pub fn add_critical_edge(&mut self, task_id: TaskId, sequence: u32, critical_child: TaskId) -> Result<()> {
        self.ensure_ingesting()?;
        check_critical_edge_refs(&self.registry, &self.config, task_id, critical_child)?;
        self.critical.insert(task_id, sequence, critical_child)
    }

    /// Derive task fields and close the store for writing
    ///
    /// Safe to call again: the derived fields are recomputed to the same values
    /// and the same report is returned.
    pub fn finalize(&mut self) -> FinalizeReport {
        let report = self.registry.finalize(&self.history);

        tracing::info!(
            tasks = report.tasks,
            relations = report.relations,
            events = self.history.len(),
            incomplete = report.incomplete.len(),
            "trace finalized"
        );
        for issue in &report.incomplete {
            tracing::warn!("{}", issue);
        }

        self.phase = Phase::Finalized;
        self.report = Some(report.clone());
        report
    }

    /// Report of the most recent finalization
    pub fn finalize_report(&self) -> Option<&FinalizeReport> {
        self.report.as_ref()
    }

    // ---- simulations -----------------------------------------------------

    /// Start ingesting a simulated schedule for `sim_id`
    ///
    /// # Errors
    ///
    /// - [`TraceError::NotFinalized`] before the real trace is finalized
    /// - [`TraceError::DuplicateSimulation`] if `sim_id` is already attached
    pub fn simulation_builder(&self, sim_id: SimId) -> Result<SimulationBuilder<'_>> {
        if !self.is_finalized() {
            return Err(TraceError::NotFinalized);
        }
        if self.simulations.contains_key(&sim_id) {
            return Err(TraceError::DuplicateSimulation { sim_id });
        }
        Ok(SimulationBuilder::new(
            sim_id,
            &self.registry,
            &self.interner,
            &self.config,
        ))
    }

    /// Attach a finished simulation partition
    pub fn attach_simulation(&mut self, partition: SimulationPartition) -> Result<()> {
        if !self.is_finalized() {
            return Err(TraceError::NotFinalized);
        }
        let sim_id = partition.sim_id();
        if self.simulations.contains_key(&sim_id) {
            return Err(TraceError::DuplicateSimulation { sim_id });
        }
        tracing::info!(
            sim_id,
            events = partition.history().len(),
            critical_edges = partition.critical_edges().len(),
            "simulation attached"
        );
        self.simulations.insert(sim_id, partition);
        Ok(())
    }

    /// Remove a simulation partition, returning it
    pub fn clear_simulation(&mut self, sim_id: SimId) -> Result<SimulationPartition> {
        let partition = self
            .simulations
            .remove(&sim_id)
            .ok_or(TraceError::UnknownSimulation { sim_id })?;
        tracing::debug!(sim_id, "simulation cleared");
        Ok(partition)
    }

    pub fn simulation(&self, sim_id: SimId) -> Result<&SimulationPartition> {
        self.simulations
            .get(&sim_id)
            .ok_or(TraceError::UnknownSimulation { sim_id })
    }

    /// Attached simulation ids, ascending
    pub fn simulation_ids(&self) -> Vec<SimId> {
        self.simulations.keys().copied().collect()
    }

    pub fn count_simulations(&self) -> usize {
        self.simulations.len()
    }

    /// Lowest unused simulation id not below the current simulation count
    pub fn next_simulation_id(&self) -> SimId {
        let mut candidate = self.simulations.len() as SimId;
        while self.simulations.contains_key(&candidate) {
            candidate += 1;
        }
        candidate
    }

    fn log_for(&self, sim_id: Option<SimId>) -> Result<&HistoryLog> {
        match sim_id {
            None => Ok(&self.history),
            Some(id) => self.simulation(id).map(SimulationPartition::history),
        }
    }

    fn edges_for(&self, sim_id: Option<SimId>) -> Result<&CriticalEdges> {
        match sim_id {
            None => Ok(&self.critical),
            Some(id) => self.simulation(id).map(SimulationPartition::critical_edges),
        }
    }

    // ---- queries ---------------------------------------------------------

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// History log of the real trace
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Critical edges of the unpartitioned baseline
    pub fn critical_edges(&self) -> &CriticalEdges {
        &self.critical
    }

    /// Task rows with resolved attributes, keyed by id
    pub fn get_task_attributes(&self, ids: &[TaskId]) -> BTreeMap<TaskId, Result<TaskView>> {
        ids.iter()
            .map(|&id| {
                let view = self
                    .registry
                    .get(id)
                    .map(|task| TaskView {
                        task: task.clone(),
                        attributes: aggregate::resolve_attributes(&self.interner, &task.attribute_key()),
                    })
                    .ok_or(TraceError::UnknownTask { task: id });
                (id, view)
            })
            .collect()
    }

    fn known_task(&self, id: TaskId) -> Result<()> {
        if self.registry.contains(id) {
            Ok(())
        } else {
            Err(TraceError::UnknownTask { task: id })
        }
    }

    /// Ordered event history of each task within one partition
    ///
    /// The outer error is reserved for an unknown `sim_id`; an unregistered task
    /// only fails its own entry.
    pub fn get_task_history(
        &self,
        ids: &[TaskId],
        sim_id: Option<SimId>,
    ) -> Result<BTreeMap<TaskId, Result<Vec<HistoryEvent>>>> {
        let log = self.log_for(sim_id)?;
        Ok(ids
            .iter()
            .map(|&id| {
                let events = self
                    .known_task(id)
                    .map(|()| log.events_for(id).into_iter().cloned().collect());
                (id, events)
            })
            .collect())
    }

    /// Scheduling states of each task within one partition
    ///
    /// The outer error is reserved for an unknown `sim_id`; an unregistered or
    /// malformed task only fails its own entry.
    pub fn get_scheduling_states(
        &self,
        ids: &[TaskId],
        sim_id: Option<SimId>,
    ) -> Result<BTreeMap<TaskId, Result<Vec<SchedulingState>>>> {
        let log = self.log_for(sim_id)?;
        let (known, unknown): (Vec<TaskId>, Vec<TaskId>) =
            ids.iter().partition(|&&id| self.registry.contains(id));
        let mut states = intervals::scheduling_states_for(log, &known);
        states.extend(
            unknown
                .into_iter()
                .map(|id| (id, Err(TraceError::UnknownTask { task: id }))),
        );
        for (task, result) in &states {
            if let Err(err) = result {
                tracing::warn!(task, scope = %log.scope(), "{}", err);
            }
        }
        Ok(states)
    }

    /// Top-level phase tasks
    ///
    /// These are the children of the configured root task when it is registered,
    /// otherwise every task without a parent.
    pub fn phase_tasks(&self) -> Vec<TaskId> {
        if self.registry.contains(self.config.root_task) {
            self.registry.children_of(self.config.root_task)
        } else {
            self.registry.root_tasks()
        }
    }

    /// Scheduling states of every phase task, each with the children it created
    ///
    /// Intervals opening at CREATE are skipped, so a phase starts when it first
    /// runs. Child creation times always come from the real trace.
    pub fn get_phase_scheduling(
        &self,
        sim_id: Option<SimId>,
    ) -> Result<BTreeMap<TaskId, Result<Vec<PhaseInterval>>>> {
        let states = self.get_scheduling_states(&self.phase_tasks(), sim_id)?;
        Ok(states
            .into_iter()
            .map(|(task, result)| {
                let intervals = result.map(|states| {
                    states
                        .into_iter()
                        .filter(|state| state.action_start != Action::Create)
                        .map(|state| {
                            let children = self.registry.children_created_between(
                                task,
                                state.start_ts,
                                state.end_ts,
                            );
                            let descendants = children
                                .iter()
                                .map(|&(child, _)| self.registry.descendants_of(child).len())
                                .sum();
                            PhaseInterval {
                                state,
                                children: children.len(),
                                descendants,
                            }
                        })
                        .collect()
                });
                (task, intervals)
            })
            .collect())
    }

    /// Critical tasks reachable from `root` within one partition
    pub fn get_critical_tasks(&self, root: TaskId, sim_id: Option<SimId>) -> Result<CriticalPath> {
        resolve_critical_path(self.edges_for(sim_id)?, root)
    }

    /// Critical tasks reachable from the configured root task
    pub fn critical_path(&self, sim_id: Option<SimId>) -> Result<CriticalPath> {
        self.get_critical_tasks(self.config.root_task, sim_id)
    }

    /// Critical successors of one task, ordered by sequence
    pub fn critical_children(&self, task: TaskId, sim_id: Option<SimId>) -> Result<Vec<TaskId>> {
        Ok(self.edges_for(sim_id)?.critical_children(task))
    }

    /// Suspend metadata of one task within one partition
    pub fn task_suspend_meta(&self, task: TaskId, sim_id: Option<SimId>) -> Result<Vec<SuspendMetadata>> {
        Ok(self.log_for(sim_id)?.suspend_meta_for(task))
    }

    /// Count tasks grouped by `(label, create, start, end location)`
    pub fn count_tasks_by_attributes(&self) -> Vec<TaskTypeCount> {
        aggregate::count_tasks_by_attributes(&self.registry, &self.interner)
    }

    /// Count distinct children grouped by parent and child attributes
    pub fn count_children_by_parent_attributes(&self) -> Vec<ParentChildCount> {
        aggregate::count_children_by_parent_attributes(&self.registry, &self.interner)
    }

    /// Tasks without a parent, ascending
    pub fn root_tasks(&self) -> Vec<TaskId> {
        self.registry.root_tasks()
    }

    pub fn children_of(&self, task: TaskId) -> Vec<TaskId> {
        self.registry.children_of(task)
    }

    pub fn ancestors_of(&self, task: TaskId) -> Vec<TaskId> {
        self.registry.ancestors_of(task)
    }

    pub fn descendants_of(&self, task: TaskId) -> Vec<TaskId> {
        self.registry.descendants_of(task)
    }

    pub fn children_created_between(&self, task: TaskId, start: Ticks, end: Ticks) -> Vec<(TaskId, Ticks)> {
        self.registry.children_created_between(task, start, end)
    }

    pub fn resolve_string(&self, id: StringId) -> Result<Arc<str>> {
        self.interner.resolve(id).ok_or(TraceError::UnknownString(id.0))
    }

    pub fn resolve_location(&self, id: LocationId) -> Result<SourceLocation> {
        self.interner
            .resolve_location(id)
            .ok_or(TraceError::UnknownLocation(id.0))
    }

    /// Every interned string, ascending by id
    pub fn all_strings(&self) -> Vec<(StringId, Arc<str>)> {
        self.interner.strings()
    }

    /// Every source location, ordered by file name then line
    pub fn all_source_locations(&self) -> Vec<(LocationId, SourceLocation)> {
        let mut locations: Vec<(LocationId, SourceLocation)> = self
            .interner
            .locations()
            .into_iter()
            .filter_map(|(id, _)| Some((id, self.interner.resolve_location(id)?)))
            .collect();
        locations.sort_by(|(a_id, a), (b_id, b)| {
            (&a.file, a.line, a_id).cmp(&(&b.file, b.line, b_id))
        });
        locations
    }

    /// Row counts of each attached simulation, ascending by id
    pub fn simulation_row_counts(&self) -> Vec<SimulationRowCount> {
        self.simulations
            .iter()
            .map(|(&sim_id, partition)| SimulationRowCount {
                sim_id,
                sim_task_history: partition.history().len(),
                sim_suspend_meta: partition.history().suspend_meta().len(),
                sim_critical_task: partition.critical_edges().len(),
            })
            .collect()
    }

    /// Row counts of every table
    pub fn row_counts(&self) -> RowCounts {
        let partitions = self.simulations.values();
        RowCounts {
            string: self.interner.string_count(),
            source_location: self.interner.location_count(),
            task: self.registry.len(),
            task_relation: self.registry.relation_count(),
            task_history: self.history.len(),
            task_suspend_meta: self.history.suspend_meta().len(),
            critical_task: self.critical.len(),
            simulations: self.simulations.len(),
            sim_task_history: partitions.clone().map(|p| p.history().len()).sum(),
            sim_suspend_meta: partitions
                .clone()
                .map(|p| p.history().suspend_meta().len())
                .sum(),
            sim_critical_task: partitions.map(|p| p.critical_edges().len()).sum(),
        }
    }
}
