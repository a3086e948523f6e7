// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress-ledger tests: group assignment, batch computation, status
//! transitions, skip-propagation, and cross-worker resume.

use std::collections::HashMap;

use serde_json::{Value, json};

use strato_asl::StateMachine;
use strato_core::dag::{self, Dag, NodeKind};
use strato_core::error::ProgressError;
use strato_core::function::{Function, InMemoryFunctionRegistry};
use strato_core::progress::{NodeInfo, NodeStatus, NodeType, Progress};

fn registry_with(names: &[&str]) -> InMemoryFunctionRegistry {
    let registry = InMemoryFunctionRegistry::new();
    for name in names {
        registry.register(Function {
            name: name.to_string(),
            image: "strato/runtime-python:latest".to_string(),
            memory_mb: 128,
            cpu_quota: 0.25,
            handler: "handler.run".to_string(),
            handler_dir: "/app".to_string(),
            command: vec![],
        });
    }
    registry
}

fn compile(document: Value, functions: &[&str]) -> Dag {
    let machine =
        StateMachine::parse("test", &serde_json::to_vec(&document).unwrap()).expect("valid ASL");
    dag::from_state_machine(&machine, &registry_with(functions)).expect("compiles")
}

fn linear_dag() -> Dag {
    compile(
        json!({
            "StartAt": "A",
            "States": {
                "A": {"Type": "Task", "Resource": "f", "Next": "B"},
                "B": {"Type": "Task", "Resource": "f", "Next": "Done"},
                "Done": {"Type": "Succeed"}
            }
        }),
        &["f"],
    )
}

fn parallel_dag() -> Dag {
    compile(
        json!({
            "StartAt": "Fork",
            "States": {
                "Fork": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "A", "States": {"A": {"Type": "Task", "Resource": "f", "End": true}}},
                        {"StartAt": "B", "States": {"B": {"Type": "Task", "Resource": "f", "End": true}}}
                    ],
                    "Next": "Done"
                },
                "Done": {"Type": "Succeed"}
            }
        }),
        &["f"],
    )
}

fn choice_dag() -> Dag {
    compile(
        json!({
            "StartAt": "Decide",
            "States": {
                "Decide": {
                    "Type": "Choice",
                    "Choices": [{"Variable": "$.x", "NumericEquals": 5, "Next": "A"}],
                    "Default": "B"
                },
                "A": {"Type": "Task", "Resource": "f", "End": true},
                "B": {"Type": "Task", "Resource": "f", "End": true}
            }
        }),
        &["f"],
    )
}

/// Scenario: linear Task(A) -> Task(B) -> Succeed.
#[test]
fn linear_groups_and_batches() {
    let dag = linear_dag();
    let mut progress = Progress::init("req-linear", &dag);

    assert_eq!(progress.group_of(dag.start_id()), Some(0));
    assert_eq!(progress.group_of("A"), Some(1));
    assert_eq!(progress.group_of("B"), Some(2));
    assert_eq!(progress.group_of(dag.end_id()), Some(3));
    // The end node sits at the tail of the ledger.
    assert_eq!(progress.nodes.last().unwrap().node_type, NodeType::End);

    assert_eq!(progress.next_nodes().unwrap(), vec!["A".to_string()]);
    assert_eq!(progress.next_group, 1);
    progress.complete("A").unwrap();

    assert_eq!(progress.next_nodes().unwrap(), vec!["B".to_string()]);
    progress.complete("B").unwrap();

    assert_eq!(
        progress.next_nodes().unwrap(),
        vec![dag.end_id().to_string()]
    );
    progress.complete(dag.end_id()).unwrap();

    assert!(progress.is_completed());
    assert!(progress.next_nodes().unwrap().is_empty());
}

/// Scenario: parallel [A, B]. The first batch is the pair; the join
/// only appears after both complete.
#[test]
fn parallel_batches_join_after_both_branches() {
    let dag = parallel_dag();
    let mut progress = Progress::init("req-parallel", &dag);

    let first = progress.next_nodes().unwrap();
    assert_eq!(first, vec!["A".to_string(), "B".to_string()]);

    progress.complete("A").unwrap();
    progress.complete("B").unwrap();

    assert_eq!(progress.next_nodes().unwrap(), vec!["Fork__join".to_string()]);
    progress.complete("Fork__join").unwrap();
    assert_eq!(
        progress.next_nodes().unwrap(),
        vec![dag.end_id().to_string()]
    );
}

/// Scenario: choice on x == 5 executes A and skips the default branch.
#[test]
fn choice_resolution_skips_dead_alternatives() {
    let dag = choice_dag();
    let mut progress = Progress::init("req-choice", &dag);

    assert_eq!(progress.next_nodes().unwrap(), vec!["Decide".to_string()]);

    // Input {x: 5} satisfies the first rule: alternative 0 is chosen.
    let NodeKind::Choice {
        conditions,
        alternative_members,
        ..
    } = &dag.find("Decide").unwrap().kind
    else {
        panic!("Decide should be a choice node");
    };
    let Value::Object(input) = json!({"x": 5}) else {
        unreachable!()
    };
    let chosen = conditions
        .iter()
        .position(|c| c.evaluate(&input))
        .expect("the default makes some condition true");
    assert_eq!(chosen, 0);

    progress.complete("Decide").unwrap();
    let dead: Vec<&String> = alternative_members
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != chosen)
        .flat_map(|(_, members)| members)
        .filter(|id| !alternative_members[chosen].contains(*id))
        .collect();
    progress.skip_all(dead).unwrap();

    assert_eq!(progress.next_nodes().unwrap(), vec!["A".to_string()]);
    assert_eq!(progress.info("B").unwrap().status, NodeStatus::Skipped);
}

/// Scenario: with A failed, a subsequent batch request errors and
/// downstream nodes stay pending.
#[test]
fn failure_poisons_subsequent_batches() {
    let dag = linear_dag();
    let mut progress = Progress::init("req-fail", &dag);

    assert_eq!(progress.next_nodes().unwrap(), vec!["A".to_string()]);
    progress.fail("A").unwrap();

    assert_eq!(
        progress.next_nodes().unwrap_err(),
        ProgressError::ExecutionFailed
    );
    assert_eq!(progress.info("B").unwrap().status, NodeStatus::Pending);
    assert_eq!(
        progress.info(dag.end_id()).unwrap().status,
        NodeStatus::Pending
    );
}

/// Scenario: worker 1 completes A and crashes; worker 2 deserializes the
/// ledger and schedules B as its first batch.
#[test]
fn resume_from_serialized_ledger() {
    let dag = linear_dag();
    let mut worker1 = Progress::init("req-resume", &dag);
    worker1.next_nodes().unwrap();
    worker1.complete("A").unwrap();

    let stored = serde_json::to_vec(&worker1).unwrap();
    let mut worker2: Progress = serde_json::from_slice(&stored).unwrap();

    assert_eq!(worker2.next_nodes().unwrap(), vec!["B".to_string()]);
}

/// Round-trip: serializing and deserializing between every call observes
/// the same batch sequence as a fresh in-process run.
#[test]
fn round_trip_preserves_the_batch_sequence() {
    let dag = parallel_dag();

    let mut fresh = Progress::init("req-rt", &dag);
    let mut fresh_batches = Vec::new();
    loop {
        let batch = fresh.next_nodes().unwrap();
        if batch.is_empty() {
            break;
        }
        fresh_batches.push(batch.clone());
        for id in &batch {
            fresh.complete(id).unwrap();
        }
    }

    let mut reloaded = Progress::init("req-rt", &dag);
    let mut reloaded_batches = Vec::new();
    loop {
        let bytes = serde_json::to_vec(&reloaded).unwrap();
        reloaded = serde_json::from_slice(&bytes).unwrap();
        let batch = reloaded.next_nodes().unwrap();
        if batch.is_empty() {
            break;
        }
        reloaded_batches.push(batch.clone());
        for id in &batch {
            reloaded.complete(id).unwrap();
        }
    }

    assert_eq!(fresh_batches, reloaded_batches);
}

#[test]
fn batches_are_group_homogeneous() {
    let dag = parallel_dag();
    let mut progress = Progress::init("req-groups", &dag);
    loop {
        let batch = progress.next_nodes().unwrap();
        if batch.is_empty() {
            break;
        }
        let groups: Vec<u32> = batch
            .iter()
            .map(|id| progress.group_of(id).unwrap())
            .collect();
        assert!(
            groups.windows(2).all(|w| w[0] == w[1]),
            "batch {batch:?} spans groups {groups:?}"
        );
        for id in &batch {
            progress.complete(id).unwrap();
        }
    }
}

#[test]
fn duplicate_completion_is_an_error_and_leaves_the_ledger_unchanged() {
    let dag = linear_dag();
    let mut progress = Progress::init("req-dup", &dag);
    progress.next_nodes().unwrap();
    progress.complete("A").unwrap();

    let before = progress.clone();
    let err = progress.complete("A").unwrap_err();
    assert!(matches!(err, ProgressError::InvalidTransition { .. }));
    assert_eq!(progress, before);
}

#[test]
fn terminal_statuses_never_revert() {
    let dag = linear_dag();
    let mut progress = Progress::init("req-mono", &dag);

    progress.skip("A").unwrap();
    assert!(matches!(
        progress.complete("A"),
        Err(ProgressError::InvalidTransition { .. })
    ));

    progress.fail("B").unwrap();
    assert!(matches!(
        progress.complete("B"),
        Err(ProgressError::InvalidTransition { .. })
    ));
    assert_eq!(progress.info("A").unwrap().status, NodeStatus::Skipped);
    assert_eq!(progress.info("B").unwrap().status, NodeStatus::Failed);
}

#[test]
fn unknown_nodes_are_rejected() {
    let dag = linear_dag();
    let mut progress = Progress::init("req-unknown", &dag);
    assert!(matches!(
        progress.complete("nope"),
        Err(ProgressError::UnknownNode(_))
    ));
    assert!(matches!(
        progress.skip_all(["nope"]),
        Err(ProgressError::UnknownNode(_))
    ));
}

/// A fan-in selected while a predecessor is unfinished parks as waiting
/// and becomes runnable once the last predecessor executes.
#[test]
fn fan_in_waits_for_unfinished_predecessors() {
    // Hand-built ledger putting the barrier in the same group as a
    // predecessor, as a worker may observe mid-join in a cluster.
    let mut progress = Progress {
        request_id: "req-wait".to_string(),
        nodes: vec![
            NodeInfo {
                id: "A".to_string(),
                node_type: NodeType::Simple,
                status: NodeStatus::Pending,
                group: 0,
                branch: 0,
            },
            NodeInfo {
                id: "join".to_string(),
                node_type: NodeType::FanIn,
                status: NodeStatus::Pending,
                group: 0,
                branch: 1,
            },
            NodeInfo {
                id: "__end__".to_string(),
                node_type: NodeType::End,
                status: NodeStatus::Pending,
                group: 1,
                branch: 0,
            },
        ],
        next_group: 0,
        fan_in_deps: HashMap::from([("join".to_string(), vec!["A".to_string()])]),
    };

    // First selection: A runs, the barrier parks.
    assert_eq!(progress.next_nodes().unwrap(), vec!["A".to_string()]);
    assert_eq!(progress.info("join").unwrap().status, NodeStatus::Waiting);

    // Waiting is not terminal: the ledger is not complete while parked.
    progress.complete("A").unwrap();
    assert_eq!(progress.next_nodes().unwrap(), vec!["join".to_string()]);
    progress.complete("join").unwrap();
    assert_eq!(progress.info("join").unwrap().status, NodeStatus::Executed);
}

#[test]
fn next_group_is_untouched_when_nothing_is_pending() {
    let dag = linear_dag();
    let mut progress = Progress::init("req-idle", &dag);
    loop {
        let batch = progress.next_nodes().unwrap();
        if batch.is_empty() {
            break;
        }
        for id in &batch {
            progress.complete(id).unwrap();
        }
    }
    let settled = progress.next_group;
    assert!(progress.next_nodes().unwrap().is_empty());
    assert_eq!(progress.next_group, settled);
}

#[test]
fn unequal_branches_keep_the_join_after_the_slowest_branch() {
    let dag = compile(
        json!({
            "StartAt": "Fork",
            "States": {
                "Fork": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "A", "States": {"A": {"Type": "Task", "Resource": "f", "End": true}}},
                        {"StartAt": "B1", "States": {
                            "B1": {"Type": "Task", "Resource": "f", "Next": "B2"},
                            "B2": {"Type": "Task", "Resource": "f", "End": true}
                        }}
                    ],
                    "Next": "Done"
                },
                "Done": {"Type": "Succeed"}
            }
        }),
        &["f"],
    );
    let mut progress = Progress::init("req-uneven", &dag);

    assert_eq!(
        progress.next_nodes().unwrap(),
        vec!["A".to_string(), "B1".to_string()]
    );
    progress.complete("A").unwrap();
    progress.complete("B1").unwrap();

    assert_eq!(progress.next_nodes().unwrap(), vec!["B2".to_string()]);
    progress.complete("B2").unwrap();

    assert_eq!(progress.next_nodes().unwrap(), vec!["Fork__join".to_string()]);
}

#[test]
fn display_renders_the_ledger_table() {
    let dag = linear_dag();
    let progress = Progress::init("req-display", &dag);
    let rendered = progress.to_string();
    assert!(rendered.contains("req-display"));
    assert!(rendered.contains("Pending"));
    assert!(rendered.contains("(A"));
}

#[test]
fn unfinished_lists_pending_and_waiting_nodes() {
    let dag = linear_dag();
    let mut progress = Progress::init("req-unfinished", &dag);
    progress.next_nodes().unwrap();
    progress.complete("A").unwrap();

    let unfinished = progress.unfinished();
    assert!(unfinished.contains(&"B".to_string()));
    assert!(!unfinished.contains(&"A".to_string()));
}
