//! Text and JSON rendering of query results
//!
//! Each CLI command maps to one store query. Text output is meant for a
//! terminal; JSON output mirrors the same data for scripts. A task whose query
//! fails (unknown id, malformed interval) is reported in place and does not
//! abort the rest of the batch.

use crate::aggregate::{ParentChildCount, TaskTypeCount};
use crate::cli::{Command, OutputFormat};
use crate::critical_path::CriticalPath;
use crate::error::TraceError;
use crate::history::{Action, HistoryEvent};
use crate::interner::SourceLocation;
use crate::intervals::{active_inactive_totals, PhaseInterval, SchedulingState};
use crate::store::{RowCounts, SimulationRowCount, TraceStore};
use crate::task::{SimId, TaskAttributes, TaskId, TaskView};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Per-task batch entry: the value, or the error that replaced it
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Entry<T> {
    Ok(T),
    Err { error: String },
}

impl<T> From<std::result::Result<T, TraceError>> for Entry<T> {
    fn from(result: std::result::Result<T, TraceError>) -> Self {
        match result {
            Ok(value) => Entry::Ok(value),
            Err(err) => Entry::Err {
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryReport {
    rows: RowCounts,
    incomplete_tasks: Vec<TaskId>,
    simulations: Vec<SimId>,
}

#[derive(Debug, Serialize)]
struct EventView<'a> {
    #[serde(flatten)]
    event: &'a HistoryEvent,
    location: SourceLocation,
}

#[derive(Debug, Serialize)]
struct StringRow<'a> {
    id: u32,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct LocationRow<'a> {
    id: u32,
    #[serde(flatten)]
    location: &'a SourceLocation,
}

#[derive(Debug, Serialize)]
struct SimulationRows<'a> {
    #[serde(flatten)]
    counts: &'a SimulationRowCount,
    total: usize,
}

#[derive(Debug, Serialize)]
struct StatesView {
    states: Vec<SchedulingState>,
    active: u64,
    inactive: u64,
}

fn scope_name(sim: Option<SimId>) -> String {
    match sim {
        Some(id) => format!("simulation {}", id),
        None => "real trace".to_string(),
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn attributes_line(attributes: &TaskAttributes) -> String {
    format!(
        "{} [create {}] [start {}] [end {}]",
        attributes.label.as_deref().unwrap_or("(unlabelled)"),
        opt(attributes.create_location.as_ref()),
        opt(attributes.start_location.as_ref()),
        opt(attributes.end_location.as_ref()),
    )
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Run one command against a loaded store
pub fn run_command<W: Write>(
    store: &TraceStore,
    command: &Command,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Summary => summary(store, format, out),
        Command::Tasks { ids } => tasks(store, ids, format, out),
        Command::History { ids, sim } => history(store, ids, *sim, format, out),
        Command::States { ids, sim } => states(store, ids, *sim, format, out),
        Command::Critical { root, sim } => {
            let root = root.unwrap_or(store.config().root_task);
            let path = store.get_critical_tasks(root, *sim)?;
            critical(&path, *sim, format, out)
        }
        Command::TaskTypes => task_types(&store.count_tasks_by_attributes(), format, out),
        Command::ChildrenByParent => {
            children_by_parent(&store.count_children_by_parent_attributes(), format, out)
        }
        Command::Strings => strings(store, format, out),
        Command::Source => source(store, format, out),
        Command::Sims => sims(&store.simulation_row_counts(), format, out),
        Command::Phases { sim } => phases(store, *sim, format, out),
    }
}

fn summary<W: Write>(store: &TraceStore, format: OutputFormat, out: &mut W) -> Result<()> {
    let report = SummaryReport {
        rows: store.row_counts(),
        incomplete_tasks: store
            .finalize_report()
            .map(|r| r.incomplete_task_ids())
            .unwrap_or_default(),
        simulations: store.simulation_ids(),
    };
    if format == OutputFormat::Json {
        return write_json(out, &report);
    }

    let rows = &report.rows;
    writeln!(out, "=== Trace Summary ===")?;
    writeln!(out, "strings:            {}", rows.string)?;
    writeln!(out, "source locations:   {}", rows.source_location)?;
    writeln!(out, "tasks:              {}", rows.task)?;
    writeln!(out, "relations:          {}", rows.task_relation)?;
    writeln!(out, "events:             {}", rows.task_history)?;
    writeln!(out, "suspend metadata:   {}", rows.task_suspend_meta)?;
    writeln!(out, "critical edges:     {}", rows.critical_task)?;
    writeln!(out, "simulations:        {}", rows.simulations)?;
    if rows.simulations > 0 {
        writeln!(out, "  events:           {}", rows.sim_task_history)?;
        writeln!(out, "  suspend metadata: {}", rows.sim_suspend_meta)?;
        writeln!(out, "  critical edges:   {}", rows.sim_critical_task)?;
        let ids: Vec<String> = report.simulations.iter().map(ToString::to_string).collect();
        writeln!(out, "  ids:              {}", ids.join(", "))?;
    }
    if !report.incomplete_tasks.is_empty() {
        let ids: Vec<String> = report.incomplete_tasks.iter().map(ToString::to_string).collect();
        writeln!(out, "incomplete tasks:   {}", ids.join(", "))?;
    }
    Ok(())
}

fn tasks<W: Write>(store: &TraceStore, ids: &[TaskId], format: OutputFormat, out: &mut W) -> Result<()> {
    let views = store.get_task_attributes(ids);
    if format == OutputFormat::Json {
        let entries: BTreeMap<TaskId, Entry<TaskView>> =
            views.into_iter().map(|(id, view)| (id, view.into())).collect();
        return write_json(out, &entries);
    }

    for (id, view) in views {
        let view = match view {
            Ok(view) => view,
            Err(err) => {
                writeln!(out, "task {}: {}", id, err)?;
                continue;
            }
        };
        let task = &view.task;
        writeln!(out, "task {}: {}", id, attributes_line(&view.attributes))?;
        writeln!(
            out,
            "  parent {}  children {}  create {}  start {}  end {}  duration {}",
            opt(task.parent_id),
            task.num_children,
            opt(task.create_ts),
            opt(task.start_ts),
            opt(task.end_ts),
            opt(task.duration()),
        )?;
    }
    Ok(())
}

fn history<W: Write>(
    store: &TraceStore,
    ids: &[TaskId],
    sim: Option<SimId>,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let events = store.get_task_history(ids, sim)?;
    let location = |event: &HistoryEvent| {
        store
            .resolve_location(event.location_id)
            .unwrap_or_default()
    };

    if format == OutputFormat::Json {
        let views: BTreeMap<TaskId, Entry<Vec<EventView<'_>>>> = events
            .iter()
            .map(|(&id, result)| {
                let entry = match result {
                    Ok(events) => Entry::Ok(
                        events
                            .iter()
                            .map(|event| EventView {
                                event,
                                location: location(event),
                            })
                            .collect(),
                    ),
                    Err(err) => Entry::Err {
                        error: err.to_string(),
                    },
                };
                (id, entry)
            })
            .collect();
        return write_json(out, &views);
    }

    for (id, result) in &events {
        let events = match result {
            Ok(events) => events,
            Err(err) => {
                writeln!(out, "task {} ({}): {}", id, scope_name(sim), err)?;
                continue;
            }
        };
        writeln!(out, "task {} ({}):", id, scope_name(sim))?;
        for event in events {
            let context = event
                .context
                .map(|c| format!("  [cpu {}, thread {}]", c.cpu, c.thread_id))
                .unwrap_or_default();
            writeln!(
                out,
                "  {:<8} @{:<10} {}{}",
                event.action.to_string(),
                event.time,
                location(event),
                context
            )?;
        }
    }
    Ok(())
}

fn states<W: Write>(
    store: &TraceStore,
    ids: &[TaskId],
    sim: Option<SimId>,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let results = store.get_scheduling_states(ids, sim)?;

    if format == OutputFormat::Json {
        let entries: BTreeMap<TaskId, Entry<StatesView>> = results
            .into_iter()
            .map(|(id, result)| {
                let entry = result.map(|states| {
                    let (active, inactive) = active_inactive_totals(&states);
                    StatesView {
                        states,
                        active,
                        inactive,
                    }
                });
                (id, entry.into())
            })
            .collect();
        return write_json(out, &entries);
    }

    for (id, result) in results {
        let states = match result {
            Ok(states) => states,
            Err(err) => {
                writeln!(out, "task {} ({}): {}", id, scope_name(sim), err)?;
                continue;
            }
        };
        writeln!(out, "task {} ({}):", id, scope_name(sim))?;
        for state in &states {
            writeln!(
                out,
                "  {:<7} -> {:<7} {:>10} .. {:<10} {:>8}  {}",
                state.action_start.to_string(),
                state.action_end.to_string(),
                state.start_ts,
                state.end_ts,
                state.duration,
                if state.is_active() { "active" } else { "inactive" },
            )?;
        }
        let (active, inactive) = active_inactive_totals(&states);
        writeln!(out, "  active {}  inactive {}", active, inactive)?;
    }
    Ok(())
}

fn critical<W: Write>(path: &CriticalPath, sim: Option<SimId>, format: OutputFormat, out: &mut W) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, path);
    }

    let tasks: Vec<String> = path.tasks.iter().map(ToString::to_string).collect();
    writeln!(
        out,
        "critical path from task {} ({}): {}",
        path.root,
        scope_name(sim),
        if tasks.is_empty() {
            "(empty)".to_string()
        } else {
            tasks.join(", ")
        }
    )?;
    Ok(())
}

fn task_types<W: Write>(counts: &[TaskTypeCount], format: OutputFormat, out: &mut W) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, &counts);
    }
    for count in counts {
        writeln!(out, "{:>8}  {}", count.count, attributes_line(&count.attributes))?;
    }
    Ok(())
}

fn children_by_parent<W: Write>(counts: &[ParentChildCount], format: OutputFormat, out: &mut W) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, &counts);
    }
    for count in counts {
        writeln!(
            out,
            "{:>8}  {}\n          under {}",
            count.count,
            attributes_line(&count.child),
            attributes_line(&count.parent),
        )?;
    }
    Ok(())
}

fn strings<W: Write>(store: &TraceStore, format: OutputFormat, out: &mut W) -> Result<()> {
    let strings = store.all_strings();
    if format == OutputFormat::Json {
        let rows: Vec<StringRow<'_>> = strings
            .iter()
            .map(|(id, text)| StringRow { id: id.0, text })
            .collect();
        return write_json(out, &rows);
    }
    for (id, text) in &strings {
        writeln!(out, "{}\t{}", id.0, text)?;
    }
    Ok(())
}

fn source<W: Write>(store: &TraceStore, format: OutputFormat, out: &mut W) -> Result<()> {
    let locations = store.all_source_locations();
    if format == OutputFormat::Json {
        let rows: Vec<LocationRow<'_>> = locations
            .iter()
            .map(|(id, location)| LocationRow { id: id.0, location })
            .collect();
        return write_json(out, &rows);
    }
    for (id, location) in &locations {
        writeln!(out, "{}\t{}\t{}\t{}", id.0, location.file, location.line, location.func)?;
    }
    Ok(())
}

fn sims<W: Write>(counts: &[SimulationRowCount], format: OutputFormat, out: &mut W) -> Result<()> {
    if format == OutputFormat::Json {
        let rows: Vec<SimulationRows<'_>> = counts
            .iter()
            .map(|counts| SimulationRows {
                counts,
                total: counts.total(),
            })
            .collect();
        return write_json(out, &rows);
    }
    for count in counts {
        writeln!(
            out,
            "{}\t{}\t(events {}, suspend metadata {}, critical edges {})",
            count.sim_id,
            count.total(),
            count.sim_task_history,
            count.sim_suspend_meta,
            count.sim_critical_task,
        )?;
    }
    Ok(())
}

fn phases<W: Write>(store: &TraceStore, sim: Option<SimId>, format: OutputFormat, out: &mut W) -> Result<()> {
    let phases = store.get_phase_scheduling(sim)?;
    if format == OutputFormat::Json {
        let entries: BTreeMap<TaskId, Entry<Vec<PhaseInterval>>> =
            phases.into_iter().map(|(id, result)| (id, result.into())).collect();
        return write_json(out, &entries);
    }

    let location = |id| store.resolve_location(id).unwrap_or_default();
    for (id, result) in phases {
        let label = store
            .registry()
            .get(id)
            .and_then(|task| task.label_id)
            .and_then(|label| store.resolve_string(label).ok());
        writeln!(
            out,
            "phase {} [{}] ({}):",
            id,
            label.as_deref().unwrap_or("(unlabelled)"),
            scope_name(sim)
        )?;
        let intervals = match result {
            Ok(intervals) => intervals,
            Err(err) => {
                writeln!(out, "  {}", err)?;
                continue;
            }
        };
        writeln!(
            out,
            "  {:>15} | {:>15} | {:>9} | {:>9} | {:<8} | LOCATION",
            "TIME", "DURATION", "CHILDREN", "DESC.", "ACTION"
        )?;
        writeln!(out, "  {}", "=".repeat(78))?;
        for interval in &intervals {
            let state = &interval.state;
            writeln!(
                out,
                "  {:>15} | {:>15} | {:>9} | {:>9} | {:<8} | {}",
                state.start_ts,
                state.duration,
                interval.children,
                interval.descendants,
                state.action_start.to_string(),
                location(state.start_location_id),
            )?;
            if state.action_end == Action::End {
                writeln!(
                    out,
                    "  {:>15} | {:>15} | {:>9} | {:>9} | {:<8} | {}",
                    state.end_ts,
                    "-",
                    "-",
                    "-",
                    state.action_end.to_string(),
                    location(state.end_location_id),
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Ticks;

    fn store() -> TraceStore {
        let mut store = TraceStore::new();
        let loc = store.intern_location("main.c", "compute", 42).unwrap();
        store.register_task(1, None, Some("phase")).unwrap();
        store.register_task(5, Some(1), Some("compute")).unwrap();
        for (action, t) in [
            (Action::Create, 0),
            (Action::Start, 10),
            (Action::Suspend, 20),
            (Action::Resume, 30),
            (Action::End, 50),
        ] {
            store.append_event(5, action, Ticks(t), loc, None).unwrap();
        }
        store.add_critical_edge(0, 0, 5).unwrap();
        store.finalize();
        store
    }

    fn render(command: Command, format: OutputFormat) -> String {
        let mut out = Vec::new();
        run_command(&store(), &command, format, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_summary_lists_incomplete_tasks() {
        let text = render(Command::Summary, OutputFormat::Text);
        assert!(text.contains("tasks:              2"));
        assert!(text.contains("incomplete tasks:   1"));
    }

    #[test]
    fn test_states_text_totals() {
        let text = render(
            Command::States {
                ids: vec![5],
                sim: None,
            },
            OutputFormat::Text,
        );
        assert!(text.contains("task 5 (real trace):"));
        assert!(text.contains("active 30  inactive 20"));
    }

    #[test]
    fn test_states_json_reports_errors_in_place() {
        let json = render(
            Command::States {
                ids: vec![5, 6],
                sim: None,
            },
            OutputFormat::Json,
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["5"]["states"].as_array().unwrap().len(), 4);
        assert_eq!(value["5"]["active"], 30);
        assert_eq!(value["6"]["error"], "unknown task 6");
    }

    #[test]
    fn test_unknown_task_reported_in_place() {
        let json = render(Command::Tasks { ids: vec![5, 8] }, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["5"]["id"], 5);
        assert_eq!(value["5"]["attributes"]["label"], "compute");
        assert_eq!(value["8"]["error"], "unknown task 8");
    }

    #[test]
    fn test_history_text_resolves_locations() {
        let text = render(
            Command::History {
                ids: vec![5],
                sim: None,
            },
            OutputFormat::Text,
        );
        assert!(text.contains("main.c:42 in compute"));
        assert_eq!(text.lines().count(), 6);
    }

    #[test]
    fn test_critical_text() {
        let text = render(Command::Critical { root: None, sim: None }, OutputFormat::Text);
        assert_eq!(text.trim(), "critical path from task 0 (real trace): 5");
    }

    #[test]
    fn test_unknown_simulation_fails_command() {
        let mut out = Vec::new();
        let result = run_command(
            &store(),
            &Command::Critical {
                root: None,
                sim: Some(4),
            },
            OutputFormat::Text,
            &mut out,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_task_types_json() {
        let json = render(Command::TaskTypes, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let total: u64 = value
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["count"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_history_reports_unknown_task_in_place() {
        let text = render(
            Command::History {
                ids: vec![5, 6],
                sim: None,
            },
            OutputFormat::Text,
        );
        assert!(text.contains("task 6 (real trace): unknown task 6"));
        assert!(text.contains("main.c:42 in compute"));
    }

    #[test]
    fn test_source_listing() {
        let text = render(Command::Source, OutputFormat::Text);
        assert_eq!(text.trim(), "0\tmain.c\t42\tcompute");
    }

    #[test]
    fn test_strings_json() {
        let json = render(Command::Strings, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let texts: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["text"].as_str().unwrap())
            .collect();
        assert!(texts.contains(&"main.c"));
        assert!(texts.contains(&"phase"));
    }

    #[test]
    fn test_phases_text() {
        let text = render(Command::Phases { sim: None }, OutputFormat::Text);
        assert!(text.contains("phase 1 [phase] (real trace):"));
        assert!(!text.contains("unknown task"));
    }
}
