//! Integration tests for the trace store
//!
//! These drive the public API the way a trace ingestor and a scheduler
//! simulator would: ingest a real trace, finalize it, attach simulated
//! schedules, then query intervals, critical paths and aggregates.

use std::collections::BTreeSet;
use std::thread;
use taskscope::history::{Action, ExecutionContext, SyncMode};
use taskscope::interner::LocationId;
use taskscope::store::TraceStore;
use taskscope::time::Ticks;
use taskscope::TraceError;

/// Ingest `(task, action, time)` rows for tasks registered under root 1
fn ingest(store: &mut TraceStore, loc: LocationId, rows: &[(u64, Action, u64)]) {
    for &(task, action, time) in rows {
        if action == Action::Create {
            store.register_task(task, Some(1), Some("work")).unwrap();
        }
        store.append_event(task, action, Ticks(time), loc, None).unwrap();
    }
}

fn fork_join_store() -> (TraceStore, LocationId) {
    let mut store = TraceStore::new();
    let loc = store.intern_location("fib.c", "fib", 12).unwrap();
    store.register_task(1, None, Some("main")).unwrap();
    store.append_event(1, Action::Create, Ticks(0), loc, None).unwrap();
    store.append_event(1, Action::Start, Ticks(1), loc, None).unwrap();
    ingest(
        &mut store,
        loc,
        &[
            (5, Action::Create, 2),
            (9, Action::Create, 3),
            (12, Action::Create, 4),
            (5, Action::Start, 10),
            (9, Action::Start, 11),
            (5, Action::Suspend, 20),
            (12, Action::Start, 21),
            (5, Action::Resume, 30),
            (9, Action::End, 40),
            (12, Action::End, 45),
            (5, Action::End, 50),
        ],
    );
    store.append_suspend_meta(5, Ticks(20), SyncMode::Children).unwrap();
    store.append_event(1, Action::End, Ticks(60), loc, None).unwrap();
    store.add_critical_edge(0, 0, 1).unwrap();
    store.add_critical_edge(1, 0, 5).unwrap();
    (store, loc)
}

#[test]
fn test_task_5_scheduling_states() {
    let (mut store, _) = fork_join_store();
    store.finalize();

    let results = store.get_scheduling_states(&[5], None).unwrap();
    let states = results[&5].as_ref().unwrap();
    let spans: Vec<(Action, Action, u64)> = states
        .iter()
        .map(|s| (s.action_start, s.action_end, s.duration))
        .collect();
    assert_eq!(
        spans,
        vec![
            (Action::Create, Action::Start, 8),
            (Action::Start, Action::Suspend, 10),
            (Action::Suspend, Action::Resume, 10),
            (Action::Resume, Action::End, 20),
        ]
    );
}

#[test]
fn test_concurrent_location_interning() {
    let store = TraceStore::new();
    let ids: Vec<LocationId> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| store.intern_location("kernel.c", "reduce", 77).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let distinct: BTreeSet<LocationId> = ids.into_iter().collect();
    assert_eq!(distinct.len(), 1);
    assert_eq!(store.interner().location_count(), 1);
    assert_eq!(store.interner().string_count(), 2);
}

#[test]
fn test_simulated_critical_path() {
    let (mut store, _) = fork_join_store();
    store.finalize();

    let mut sim = store.simulation_builder(3).unwrap();
    sim.add_critical_edge(0, 0, 5).unwrap();
    sim.add_critical_edge(5, 0, 9).unwrap();
    sim.add_critical_edge(9, 0, 12).unwrap();
    let partition = sim.finish();
    store.attach_simulation(partition).unwrap();

    assert_eq!(store.get_critical_tasks(0, Some(3)).unwrap().tasks, vec![5, 9, 12]);
    assert_eq!(store.get_critical_tasks(0, None).unwrap().tasks, vec![1, 5]);
}

#[test]
fn test_incomplete_task_is_still_counted() {
    let (mut store, loc) = fork_join_store();
    store.register_task(20, Some(1), Some("work")).unwrap();
    store.append_event(20, Action::Create, Ticks(5), loc, None).unwrap();
    store.append_event(20, Action::Start, Ticks(6), loc, None).unwrap();

    let report = store.finalize();
    assert_eq!(report.incomplete_task_ids(), vec![20]);
    assert!(matches!(
        &report.incomplete[0],
        TraceError::IncompleteTask { task: 20, missing } if missing == &vec![Action::End]
    ));

    let task = store.registry().get(20).unwrap();
    assert_eq!(task.end_ts, None);
    assert_eq!(task.end_location_id, None);

    let counts = store.count_tasks_by_attributes();
    assert_eq!(counts.iter().map(|c| c.count).sum::<usize>(), store.registry().len());
    let unfinished = counts
        .iter()
        .find(|c| c.attributes.label.as_deref() == Some("work") && c.attributes.end_location.is_none())
        .unwrap();
    assert_eq!(unfinished.count, 1);
}

#[test]
fn test_duplicate_end_is_rejected() {
    let (mut store, loc) = fork_join_store();
    let before = store.history().len();
    assert_eq!(
        store.append_event(5, Action::End, Ticks(70), loc, None),
        Err(TraceError::DuplicateUniqueAction {
            task: 5,
            action: Action::End
        })
    );
    assert_eq!(store.history().len(), before);
}

#[test]
fn test_finalize_derives_lifecycle_fields() {
    let (mut store, loc) = fork_join_store();
    store.finalize();

    let task = store.registry().get(5).unwrap();
    assert_eq!(task.create_ts, Some(Ticks(2)));
    assert_eq!(task.start_ts, Some(Ticks(10)));
    assert_eq!(task.end_ts, Some(Ticks(50)));
    assert_eq!(task.start_location_id, Some(loc));
    assert_eq!(store.registry().get(1).unwrap().num_children, 3);
}

#[test]
fn test_relation_queries() {
    let (mut store, _) = fork_join_store();
    store.finalize();

    assert_eq!(store.children_of(1), vec![5, 9, 12]);
    assert_eq!(store.ancestors_of(9), vec![1]);
    assert_eq!(store.descendants_of(1), vec![5, 9, 12]);
    let created: Vec<u64> = store
        .children_created_between(1, Ticks(3), Ticks(4))
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(created, vec![9, 12]);

    let counts = store.count_children_by_parent_attributes();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].parent.label.as_deref(), Some("main"));
    assert_eq!(counts[0].count, 3);
}

#[test]
fn test_parallel_simulations_stay_isolated() {
    let (mut store, loc) = fork_join_store();
    store.finalize();

    let partitions = thread::scope(|s| {
        let handles: Vec<_> = (0..4u32)
            .map(|sim_id| {
                let store = &store;
                s.spawn(move || {
                    let mut sim = store.simulation_builder(sim_id).unwrap();
                    let offset = u64::from(sim_id) * 100;
                    let context = Some(ExecutionContext::new(sim_id, 1));
                    sim.append_event(5, Action::Create, Ticks(offset), loc, context).unwrap();
                    sim.append_event(5, Action::Start, Ticks(offset + 5), loc, context).unwrap();
                    sim.append_event(5, Action::End, Ticks(offset + 5 + u64::from(sim_id)), loc, context)
                        .unwrap();
                    sim.add_critical_edge(0, 0, 5).unwrap();
                    sim.finish()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });
    for partition in partitions {
        store.attach_simulation(partition).unwrap();
    }

    assert_eq!(store.count_simulations(), 4);
    for sim_id in 0..4u32 {
        let results = store.get_scheduling_states(&[5], Some(sim_id)).unwrap();
        let states = results[&5].as_ref().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].duration, u64::from(sim_id));
        assert_eq!(states[0].start_ts, Ticks(u64::from(sim_id) * 100));
    }

    // The real trace is untouched
    let real = store.get_scheduling_states(&[5], None).unwrap();
    assert_eq!(real[&5].as_ref().unwrap().len(), 4);
}

#[test]
fn test_cyclic_simulated_path_is_reported() {
    let (mut store, _) = fork_join_store();
    store.finalize();

    let mut sim = store.simulation_builder(0).unwrap();
    sim.add_critical_edge(0, 0, 5).unwrap();
    sim.add_critical_edge(5, 0, 9).unwrap();
    sim.add_critical_edge(9, 0, 5).unwrap();
    let partition = sim.finish();
    store.attach_simulation(partition).unwrap();

    assert_eq!(
        store.get_critical_tasks(0, Some(0)),
        Err(TraceError::CyclicCriticalPath { task: 5, via: 9 })
    );
}

#[test]
fn test_malformed_interval_is_isolated_per_task() {
    let mut store = TraceStore::new();
    let loc = store.intern_location("a.c", "f", 1).unwrap();
    for task in [1, 2] {
        store.register_task(task, None, None).unwrap();
    }
    store.append_event(1, Action::Create, Ticks(0), loc, None).unwrap();
    store.append_event(1, Action::Start, Ticks(40), loc, None).unwrap();
    store.append_event(1, Action::End, Ticks(25), loc, None).unwrap();
    store.append_event(2, Action::Create, Ticks(0), loc, None).unwrap();
    store.append_event(2, Action::Start, Ticks(1), loc, None).unwrap();
    store.finalize();

    let results = store.get_scheduling_states(&[1, 2], None).unwrap();
    assert!(matches!(results[&1], Err(TraceError::MalformedInterval { task: 1, .. })));
    assert_eq!(results[&2].as_ref().unwrap().len(), 1);
}
