//! Snapshot persistence
//!
//! A snapshot is a JSON document holding one array per table of the trace
//! schema. Row ids of strings and source locations are the ids of the store that
//! wrote the snapshot; loading re-interns them and remaps every reference, then
//! replays each row through the validating ingestion API. A snapshot that breaks
//! an ingestion rule (a second END for a task, an event of an unknown task) is
//! rejected exactly like live ingestion would reject it.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "string": [{"id": 0, "text": "main.c"}, {"id": 1, "text": "compute"}],
//!   "source_location": [{"id": 0, "file_id": 0, "func_id": 1, "line": 42}],
//!   "task": [{"id": 5, "parent_id": null, "label_id": 1}],
//!   "task_history": [{"task_id": 5, "action": 1, "time": "0", "location_id": 0}],
//!   "sim_critical_task": [{"sim_id": 3, "task_id": 0, "sequence": 0, "critical_child": 5}]
//! }
//! ```
//!
//! Every table may be omitted. Timestamps may be integers or decimal text.

use crate::config::StoreConfig;
use crate::error::TraceError;
use crate::history::{Action, ExecutionContext, HistoryEvent, SyncMode};
use crate::interner::{LocationId, LocationKey, StringId};
use crate::store::TraceStore;
use crate::task::{SimId, TaskId, TaskRelation};
use crate::time::Ticks;
use anyhow::{bail, Context, Result};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::Path;

/// Snapshot format version written by this crate
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringRow {
    pub id: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocationRow {
    pub id: u32,
    pub file_id: u32,
    pub func_id: u32,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub label_id: Option<u32>,
}

/// Row of `task_history` or `sim_task_history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_id: Option<SimId>,
    pub task_id: TaskId,
    pub action: Action,
    pub time: Ticks,
    pub location_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u64>,
}

/// Row of `task_suspend_meta` or `sim_suspend_meta`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendMetaRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_id: Option<SimId>,
    pub task_id: TaskId,
    pub time: Ticks,
    pub sync_descendants: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SyncMode>,
}

/// Row of `critical_task` or `sim_critical_task`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalTaskRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_id: Option<SimId>,
    pub task_id: TaskId,
    pub sequence: u32,
    pub critical_child: TaskId,
}

/// Persisted form of a [`TraceStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSnapshot {
    pub version: u32,
    #[serde(default)]
    pub string: Vec<StringRow>,
    #[serde(default)]
    pub source_location: Vec<SourceLocationRow>,
    #[serde(default)]
    pub task: Vec<TaskRow>,
    #[serde(default)]
    pub task_relation: Vec<TaskRelation>,
    #[serde(default)]
    pub task_history: Vec<HistoryRow>,
    #[serde(default)]
    pub task_suspend_meta: Vec<SuspendMetaRow>,
    #[serde(default)]
    pub critical_task: Vec<CriticalTaskRow>,
    #[serde(default)]
    pub sim_task_history: Vec<HistoryRow>,
    #[serde(default)]
    pub sim_suspend_meta: Vec<SuspendMetaRow>,
    #[serde(default)]
    pub sim_critical_task: Vec<CriticalTaskRow>,
}

#[derive(Default)]
struct SimulationRows<'a> {
    history: Vec<&'a HistoryRow>,
    suspend_meta: Vec<&'a SuspendMetaRow>,
    critical: Vec<&'a CriticalTaskRow>,
}

// Snapshot ids → ids of the store being loaded
#[derive(Default)]
struct IdRemap {
    strings: FnvHashMap<u32, StringId>,
    locations: FnvHashMap<u32, LocationId>,
}

impl IdRemap {
    fn string(&self, id: u32) -> Result<StringId, TraceError> {
        self.strings
            .get(&id)
            .copied()
            .ok_or(TraceError::UnknownString(id))
    }

    fn location(&self, id: u32) -> Result<LocationId, TraceError> {
        self.locations
            .get(&id)
            .copied()
            .ok_or(TraceError::UnknownLocation(id))
    }
}

impl HistoryRow {
    fn from_event(sim_id: Option<SimId>, event: &HistoryEvent) -> Self {
        Self {
            sim_id,
            task_id: event.task_id,
            action: event.action,
            time: event.time,
            location_id: event.location_id.0,
            cpu: event.context.map(|c| c.cpu),
            thread_id: event.context.map(|c| c.thread_id),
        }
    }

    fn context(&self) -> Result<Option<ExecutionContext>> {
        match (self.cpu, self.thread_id) {
            (Some(cpu), Some(thread_id)) => Ok(Some(ExecutionContext::new(cpu, thread_id))),
            (None, None) => Ok(None),
            _ => bail!(
                "event of task {} at {} has a partial execution context",
                self.task_id,
                self.time
            ),
        }
    }
}

impl SuspendMetaRow {
    fn mode(&self) -> Result<SyncMode> {
        let from_flag = SyncMode::from_flag(self.sync_descendants);
        match self.mode {
            None => Ok(from_flag),
            Some(mode) if (mode == SyncMode::Descendants) == self.sync_descendants => Ok(mode),
            Some(mode) => bail!(
                "suspend metadata of task {} at {} has mode {:?} but sync_descendants = {}",
                self.task_id,
                self.time,
                mode,
                self.sync_descendants
            ),
        }
    }
}

fn reject_sim_id(table: &str, sim_id: Option<SimId>) -> Result<()> {
    match sim_id {
        Some(id) => bail!("row of {} carries sim_id {}", table, id),
        None => Ok(()),
    }
}

fn require_sim_id(table: &str, sim_id: Option<SimId>) -> Result<SimId> {
    sim_id.with_context(|| format!("row of {} is missing sim_id", table))
}

impl TraceSnapshot {
    /// Capture every table of `store`
    pub fn from_store(store: &TraceStore) -> Self {
        let interner = store.interner();
        let mut snapshot = Self {
            version: SNAPSHOT_VERSION,
            string: interner
                .strings()
                .into_iter()
                .map(|(id, text)| StringRow {
                    id: id.0,
                    text: text.to_string(),
                })
                .collect(),
            source_location: interner
                .locations()
                .into_iter()
                .map(|(id, key)| SourceLocationRow {
                    id: id.0,
                    file_id: key.file.0,
                    func_id: key.func.0,
                    line: key.line,
                })
                .collect(),
            task: store
                .registry()
                .tasks()
                .map(|task| TaskRow {
                    id: task.id,
                    parent_id: task.parent_id,
                    label_id: task.label_id.map(|id| id.0),
                })
                .collect(),
            task_relation: store.registry().relations().copied().collect(),
            ..Self::default()
        };

        let partitions = std::iter::once((None, store.history(), store.critical_edges())).chain(
            store
                .simulation_ids()
                .into_iter()
                .filter_map(|id| store.simulation(id).ok())
                .map(|p| (Some(p.sim_id()), p.history(), p.critical_edges())),
        );

        for (sim_id, log, edges) in partitions {
            let (history, suspend_meta, critical) = match sim_id {
                None => (
                    &mut snapshot.task_history,
                    &mut snapshot.task_suspend_meta,
                    &mut snapshot.critical_task,
                ),
                Some(_) => (
                    &mut snapshot.sim_task_history,
                    &mut snapshot.sim_suspend_meta,
                    &mut snapshot.sim_critical_task,
                ),
            };
            history.extend(log.events().iter().map(|e| HistoryRow::from_event(sim_id, e)));
            suspend_meta.extend(log.suspend_meta().iter().map(|m| SuspendMetaRow {
                sim_id,
                task_id: m.task_id,
                time: m.time,
                sync_descendants: m.sync_descendants(),
                mode: Some(m.mode),
            }));
            critical.extend(edges.iter().map(|e| CriticalTaskRow {
                sim_id,
                task_id: e.task_id,
                sequence: e.sequence,
                critical_child: e.critical_child,
            }));
        }

        snapshot
    }

    /// Parse a snapshot from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let snapshot: TraceSnapshot = serde_json::from_str(json).context("Invalid snapshot JSON")?;
        if snapshot.version != SNAPSHOT_VERSION {
            bail!(
                "Unsupported snapshot version: {} (expected {})",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(snapshot)
    }

    /// Read a snapshot file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot file: {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("Failed to load snapshot: {}", path.display()))
    }

    /// Write the snapshot as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = fs::File::create(path)
            .with_context(|| format!("Failed to create snapshot file: {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))
    }

    /// Rebuild a finalized store from the snapshot rows
    ///
    /// Tasks whose parent has no row of its own stay unlinked.
    pub fn into_store(self, config: StoreConfig) -> Result<TraceStore> {
        let mut store = TraceStore::with_config(config);
        let remap = self.intern_tables(&store)?;

        for row in &self.task {
            let label = row.label_id.map(|id| remap.string(id)).transpose()?;
            store
                .register_task_row(row.id, row.parent_id, label)
                .with_context(|| format!("Rejected task row {}", row.id))?;
        }
        for relation in &self.task_relation {
            store
                .add_relation(relation.parent_id, relation.child_id)
                .with_context(|| {
                    format!(
                        "Rejected relation {} -> {}",
                        relation.parent_id, relation.child_id
                    )
                })?;
        }
        if store.config().link_parent_on_register {
            for row in &self.task {
                match row.parent_id {
                    Some(parent) if store.registry().contains(parent) => {
                        store
                            .add_relation(parent, row.id)
                            .with_context(|| format!("Failed to link task {} to {}", row.id, parent))?;
                    }
                    Some(parent) => {
                        tracing::debug!(task = row.id, parent, "parent has no task row");
                    }
                    None => {}
                }
            }
        }

        for row in &self.task_history {
            reject_sim_id("task_history", row.sim_id)?;
            store
                .append_event(
                    row.task_id,
                    row.action,
                    row.time,
                    remap.location(row.location_id)?,
                    row.context()?,
                )
                .with_context(|| format!("Rejected {} event of task {}", row.action, row.task_id))?;
        }
        for row in &self.task_suspend_meta {
            reject_sim_id("task_suspend_meta", row.sim_id)?;
            store
                .append_suspend_meta(row.task_id, row.time, row.mode()?)
                .with_context(|| format!("Rejected suspend metadata of task {}", row.task_id))?;
        }
        for row in &self.critical_task {
            reject_sim_id("critical_task", row.sim_id)?;
            store
                .add_critical_edge(row.task_id, row.sequence, row.critical_child)
                .with_context(|| format!("Rejected critical edge {} -> {}", row.task_id, row.critical_child))?;
        }

        store.finalize();
        self.load_simulations(&mut store, &remap)?;

        tracing::info!(
            tasks = store.registry().len(),
            events = store.history().len(),
            simulations = store.count_simulations(),
            "snapshot loaded"
        );
        Ok(store)
    }

    fn intern_tables(&self, store: &TraceStore) -> Result<IdRemap> {
        let mut remap = IdRemap::default();
        for row in &self.string {
            let id = store.intern(&row.text)?;
            if remap.strings.insert(row.id, id).is_some() {
                bail!("Duplicate string id {} in snapshot", row.id);
            }
        }
        for row in &self.source_location {
            let key = LocationKey {
                file: remap.string(row.file_id)?,
                func: remap.string(row.func_id)?,
                line: row.line,
            };
            let id = store
                .interner()
                .intern_location_key(key)
                .with_context(|| format!("Source location {} references unknown strings", row.id))?;
            if remap.locations.insert(row.id, id).is_some() {
                bail!("Duplicate source location id {} in snapshot", row.id);
            }
        }
        Ok(remap)
    }

    fn load_simulations(&self, store: &mut TraceStore, remap: &IdRemap) -> Result<()> {
        let mut by_sim: BTreeMap<SimId, SimulationRows<'_>> = BTreeMap::new();
        for row in &self.sim_task_history {
            let sim_id = require_sim_id("sim_task_history", row.sim_id)?;
            by_sim.entry(sim_id).or_default().history.push(row);
        }
        for row in &self.sim_suspend_meta {
            let sim_id = require_sim_id("sim_suspend_meta", row.sim_id)?;
            by_sim.entry(sim_id).or_default().suspend_meta.push(row);
        }
        for row in &self.sim_critical_task {
            let sim_id = require_sim_id("sim_critical_task", row.sim_id)?;
            by_sim.entry(sim_id).or_default().critical.push(row);
        }

        for (sim_id, rows) in by_sim {
            let partition = {
                let mut sim = store.simulation_builder(sim_id)?;
                for row in rows.history {
                    sim.append_event(
                        row.task_id,
                        row.action,
                        row.time,
                        remap.location(row.location_id)?,
                        row.context()?,
                    )
                    .with_context(|| {
                        format!(
                            "Rejected {} event of task {} in simulation {}",
                            row.action, row.task_id, sim_id
                        )
                    })?;
                }
                for row in rows.suspend_meta {
                    sim.append_suspend_meta(row.task_id, row.time, row.mode()?)
                        .with_context(|| {
                            format!(
                                "Rejected suspend metadata of task {} in simulation {}",
                                row.task_id, sim_id
                            )
                        })?;
                }
                for row in rows.critical {
                    sim.add_critical_edge(row.task_id, row.sequence, row.critical_child)
                        .with_context(|| {
                            format!(
                                "Rejected critical edge {} -> {} in simulation {}",
                                row.task_id, row.critical_child, sim_id
                            )
                        })?;
                }
                sim.finish()
            };
            store.attach_simulation(partition)?;
        }
        Ok(())
    }
}

/// Load a snapshot file into a finalized store
pub fn load_store<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<TraceStore> {
    let path = path.as_ref();
    TraceSnapshot::load(path)?
        .into_store(config)
        .with_context(|| format!("Failed to replay snapshot: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const SNAPSHOT: &str = r#"{
        "version": 1,
        "string": [
            {"id": 10, "text": "main.c"},
            {"id": 11, "text": "compute"}
        ],
        "source_location": [{"id": 3, "file_id": 10, "func_id": 11, "line": 42}],
        "task": [
            {"id": 1},
            {"id": 5, "parent_id": 1, "label_id": 11}
        ],
        "task_history": [
            {"task_id": 5, "action": 1, "time": "0", "location_id": 3},
            {"task_id": 5, "action": 2, "time": 10, "location_id": 3, "cpu": 2, "thread_id": 900},
            {"task_id": 5, "action": 4, "time": "20", "location_id": 3},
            {"task_id": 5, "action": 5, "time": 30, "location_id": 3},
            {"task_id": 5, "action": 3, "time": 50, "location_id": 3}
        ],
        "task_suspend_meta": [{"task_id": 5, "time": 20, "sync_descendants": true}],
        "critical_task": [{"task_id": 0, "sequence": 0, "critical_child": 5}],
        "sim_critical_task": [{"sim_id": 3, "task_id": 0, "sequence": 0, "critical_child": 1}]
    }"#;

    fn load(json: &str) -> Result<TraceStore> {
        TraceSnapshot::from_json_str(json)?.into_store(StoreConfig::default())
    }

    #[test]
    fn test_loads_and_finalizes() {
        let store = load(SNAPSHOT).unwrap();
        assert!(store.is_finalized());
        assert_eq!(store.children_of(1), vec![5]);

        let task = store.registry().get(5).unwrap();
        assert_eq!(task.end_ts, Some(Ticks(50)));
        let label = store.resolve_string(task.label_id.unwrap()).unwrap();
        assert_eq!(&*label, "compute");

        let history = store.get_task_history(&[5], None).unwrap();
        assert_eq!(history[&5].as_ref().unwrap()[1].context, Some(ExecutionContext::new(2, 900)));
        assert_eq!(
            store.task_suspend_meta(5, None).unwrap()[0].mode,
            SyncMode::Descendants
        );
        assert_eq!(store.critical_path(None).unwrap().tasks, vec![5]);
        assert_eq!(store.critical_path(Some(3)).unwrap().tasks, vec![1]);
    }

    #[test]
    fn test_duplicate_unique_action_rejected() {
        let json = r#"{
            "version": 1,
            "string": [{"id": 0, "text": "a.c"}],
            "source_location": [{"id": 0, "file_id": 0, "func_id": 0, "line": 1}],
            "task": [{"id": 7}],
            "task_history": [
                {"task_id": 7, "action": 3, "time": 5, "location_id": 0},
                {"task_id": 7, "action": 3, "time": 6, "location_id": 0}
            ]
        }"#;
        let err = load(json).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TraceError>(),
            Some(&TraceError::DuplicateUniqueAction {
                task: 7,
                action: Action::End
            })
        );
    }

    #[test]
    fn test_unknown_location_rejected() {
        let json = r#"{
            "version": 1,
            "task": [{"id": 7}],
            "task_history": [{"task_id": 7, "action": 1, "time": 5, "location_id": 4}]
        }"#;
        let err = load(json).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TraceError>(),
            Some(&TraceError::UnknownLocation(4))
        );
    }

    #[test]
    fn test_text_timestamp_must_be_decimal() {
        let json = r#"{
            "version": 1,
            "task": [{"id": 7}],
            "task_suspend_meta": [{"task_id": 7, "time": "1.5e3", "sync_descendants": false}]
        }"#;
        assert!(TraceSnapshot::from_json_str(json).is_err());
    }

    #[test]
    fn test_unsupported_version() {
        let err = TraceSnapshot::from_json_str(r#"{"version": 9}"#).unwrap_err();
        assert!(err.to_string().contains("Unsupported snapshot version"));
    }

    #[test]
    fn test_sim_rows_need_sim_id() {
        let json = r#"{
            "version": 1,
            "task": [{"id": 1}],
            "sim_critical_task": [{"task_id": 0, "sequence": 0, "critical_child": 1}]
        }"#;
        let err = load(json).unwrap_err();
        assert!(err.to_string().contains("missing sim_id"));
    }

    #[test]
    fn test_conflicting_suspend_mode_rejected() {
        let json = r#"{
            "version": 1,
            "string": [{"id": 0, "text": "a.c"}],
            "source_location": [{"id": 0, "file_id": 0, "func_id": 0, "line": 1}],
            "task": [{"id": 7}],
            "task_history": [{"task_id": 7, "action": 4, "time": 5, "location_id": 0}],
            "task_suspend_meta": [{"task_id": 7, "time": 5, "sync_descendants": false, "mode": "descendants"}]
        }"#;
        assert!(load(json).is_err());
    }

    #[test]
    fn test_save_and_reload_preserves_queries() -> Result<()> {
        let store = load(SNAPSHOT)?;
        let file = NamedTempFile::new()?;
        TraceSnapshot::from_store(&store).save(file.path())?;

        let reloaded = load_store(file.path(), StoreConfig::default())?;
        assert_eq!(reloaded.row_counts(), store.row_counts());
        assert_eq!(
            reloaded.get_scheduling_states(&[5], None)?,
            store.get_scheduling_states(&[5], None)?
        );
        assert_eq!(
            reloaded.critical_path(Some(3))?,
            store.critical_path(Some(3))?
        );
        Ok(())
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_store("/nonexistent/trace.json", StoreConfig::default()).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/trace.json"));
    }
}
