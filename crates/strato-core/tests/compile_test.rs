// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compiler tests: lowering state machines to executable DAGs.

use serde_json::{Value, json};

use strato_asl::StateMachine;
use strato_core::composition::Composition;
use strato_core::condition::Condition;
use strato_core::dag::{self, Dag, NodeKind, WaitSpec, Work};
use strato_core::error::{CompileError, CoreError};
use strato_core::function::{Function, InMemoryFunctionRegistry};

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
            command: vec!["python".to_string(), "loader.py".to_string()],
        });
    }
    registry
}

fn compile(document: Value, functions: &[&str]) -> Result<Dag, CompileError> {
    let machine =
        StateMachine::parse("test", &serde_json::to_vec(&document).unwrap()).expect("valid ASL");
    dag::from_state_machine(&machine, &registry_with(functions))
}

#[test]
fn linear_machine_lowers_to_a_chain() {
    let dag = compile(
        json!({
            "StartAt": "A",
            "States": {
                "A": {"Type": "Task", "Resource": "inc", "Next": "B"},
                "B": {"Type": "Task", "Resource": "double", "Next": "Done"},
                "Done": {"Type": "Succeed"}
            }
        }),
        &["inc", "double"],
    )
    .unwrap();

    let NodeKind::Start { next } = &dag.find(dag.start_id()).unwrap().kind else {
        panic!("missing start node");
    };
    assert_eq!(next, "A");

    let NodeKind::Simple { next, work } = &dag.find("A").unwrap().kind else {
        panic!("A should be a simple node");
    };
    assert_eq!(next, "B");
    assert!(matches!(work, Work::Function(name) if name == "inc"));

    let NodeKind::Simple { next, .. } = &dag.find("B").unwrap().kind else {
        panic!("B should be a simple node");
    };
    assert_eq!(next, dag.end_id());

    // The succeed state produces no node of its own.
    assert!(dag.find("Done").is_none());
    assert_eq!(dag.len(), 4);
}

#[test]
fn choice_appends_the_constant_true_default() {
    let dag = compile(
        json!({
            "StartAt": "Decide",
            "States": {
                "Decide": {
                    "Type": "Choice",
                    "Choices": [
                        {"Variable": "$.x", "NumericEquals": 5, "Next": "A"}
                    ],
                    "Default": "B"
                },
                "A": {"Type": "Task", "Resource": "inc", "End": true},
                "B": {"Type": "Task", "Resource": "double", "End": true}
            }
        }),
        &["inc", "double"],
    )
    .unwrap();

    let NodeKind::Choice {
        conditions,
        alternatives,
        alternative_members,
    } = &dag.find("Decide").unwrap().kind
    else {
        panic!("Decide should be a choice node");
    };
    assert_eq!(conditions.len(), 2);
    assert!(matches!(conditions[0], Condition::Eq(_, _)));
    assert!(matches!(conditions[1], Condition::Const(true)));
    assert_eq!(alternatives, &vec!["A".to_string(), "B".to_string()]);
    assert_eq!(alternative_members[0], vec!["A".to_string()]);
    assert_eq!(alternative_members[1], vec!["B".to_string()]);
}

#[test]
fn choice_rules_may_share_a_successor() {
    let dag = compile(
        json!({
            "StartAt": "Decide",
            "States": {
                "Decide": {
                    "Type": "Choice",
                    "Choices": [
                        {"Variable": "$.x", "NumericLessThan": 0, "Next": "Clamp"},
                        {"Variable": "$.x", "NumericGreaterThan": 100, "Next": "Clamp"}
                    ],
                    "Default": "Keep"
                },
                "Clamp": {"Type": "Task", "Resource": "clamp", "End": true},
                "Keep": {"Type": "Pass", "End": true}
            }
        }),
        &["clamp"],
    )
    .unwrap();

    let NodeKind::Choice { alternatives, .. } = &dag.find("Decide").unwrap().kind else {
        panic!("Decide should be a choice node");
    };
    assert_eq!(
        alternatives,
        &vec!["Clamp".to_string(), "Clamp".to_string(), "Keep".to_string()]
    );
    // The shared node exists exactly once.
    assert_eq!(dag.nodes().filter(|n| n.id == "Clamp").count(), 1);
}

#[test]
fn parallel_lowers_to_a_matched_fan_out_fan_in_pair() {
    let dag = compile(
        json!({
            "StartAt": "Fork",
            "States": {
                "Fork": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "Left", "States": {"Left": {"Type": "Task", "Resource": "inc", "End": true}}},
                        {"StartAt": "Right", "States": {"Right": {"Type": "Task", "Resource": "double", "End": true}}}
                    ],
                    "Next": "Done"
                },
                "Done": {"Type": "Succeed"}
            }
        }),
        &["inc", "double"],
    )
    .unwrap();

    let NodeKind::FanOut { branches, fan_in } = &dag.find("Fork").unwrap().kind else {
        panic!("Fork should be a fan-out node");
    };
    assert_eq!(branches, &vec!["Left".to_string(), "Right".to_string()]);

    let NodeKind::FanIn { next } = &dag.find(fan_in).unwrap().kind else {
        panic!("missing the matching fan-in");
    };
    assert_eq!(next, dag.end_id());

    // Branch tails join the barrier, and branch labels follow the
    // alternative index.
    let mut predecessors = dag.predecessors(fan_in).to_vec();
    predecessors.sort();
    assert_eq!(predecessors, vec!["Left".to_string(), "Right".to_string()]);
    assert_eq!(dag.find("Left").unwrap().branch, 0);
    assert_eq!(dag.find("Right").unwrap().branch, 1);
}

#[test]
fn pass_and_wait_lower_to_pure_data_nodes() {
    let dag = compile(
        json!({
            "StartAt": "Inject",
            "States": {
                "Inject": {"Type": "Pass", "Result": {"x": 1}, "Next": "Nap"},
                "Nap": {"Type": "Wait", "Seconds": 30, "Next": "Done"},
                "Done": {"Type": "Succeed"}
            }
        }),
        &[],
    )
    .unwrap();

    let NodeKind::Simple { work, .. } = &dag.find("Inject").unwrap().kind else {
        panic!("Inject should be a simple node");
    };
    assert!(matches!(work, Work::Identity { result: Some(v) } if v == &json!({"x": 1})));

    let NodeKind::Simple { work, .. } = &dag.find("Nap").unwrap().kind else {
        panic!("Nap should be a simple node");
    };
    assert!(matches!(work, Work::Sleep(WaitSpec::Seconds(30))));
}

#[test]
fn wait_until_timestamp_parses_rfc3339() {
    let dag = compile(
        json!({
            "StartAt": "Nap",
            "States": {
                "Nap": {"Type": "Wait", "Timestamp": "2031-01-01T00:00:00Z", "Next": "Done"},
                "Done": {"Type": "Succeed"}
            }
        }),
        &[],
    )
    .unwrap();

    let NodeKind::Simple { work, .. } = &dag.find("Nap").unwrap().kind else {
        panic!("Nap should be a simple node");
    };
    let Work::Sleep(WaitSpec::Until(instant)) = work else {
        panic!("expected an until-instant sleep");
    };
    assert_eq!(instant.to_rfc3339(), "2031-01-01T00:00:00+00:00");
}

#[test]
fn wait_without_duration_is_rejected() {
    let err = compile(
        json!({
            "StartAt": "Nap",
            "States": {
                "Nap": {"Type": "Wait", "Next": "Done"},
                "Done": {"Type": "Succeed"}
            }
        }),
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::InvalidWait { .. }));
}

#[test]
fn fail_state_lowers_to_an_abort_node() {
    let dag = compile(
        json!({
            "StartAt": "Boom",
            "States": {
                "Boom": {"Type": "Fail", "Error": "States.Oops", "Cause": "went wrong"}
            }
        }),
        &[],
    )
    .unwrap();

    let NodeKind::Simple { next, work } = &dag.find("Boom").unwrap().kind else {
        panic!("Boom should be a simple node");
    };
    assert_eq!(next, dag.end_id());
    assert!(
        matches!(work, Work::Abort { error: Some(e), .. } if e == "States.Oops"),
        "fail state should carry its error name"
    );
}

#[test]
fn map_states_are_rejected_deterministically() {
    for _ in 0..3 {
        let err = compile(
            json!({
                "StartAt": "M",
                "States": {"M": {"Type": "Map", "End": true}}
            }),
            &[],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnsupportedState { state_type: "Map", .. }
        ));
    }
}

#[test]
fn unknown_functions_abort_compilation() {
    let err = compile(
        json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Task", "Resource": "missing", "End": true}}
        }),
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::UnknownFunction(name) if name == "missing"));
}

#[test]
fn reserved_comparison_operators_are_rejected() {
    let err = compile(
        json!({
            "StartAt": "Decide",
            "States": {
                "Decide": {
                    "Type": "Choice",
                    "Choices": [{"Variable": "$.s", "StringMatches": "a*", "Next": "Done"}],
                    "Default": "Done"
                },
                "Done": {"Type": "Succeed"}
            }
        }),
        &[],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CompileError::NotImplementedOperator { operator, .. } if operator == "StringMatches"
    ));
}

#[test]
fn boolean_expression_rules_are_rejected() {
    let err = compile(
        json!({
            "StartAt": "Decide",
            "States": {
                "Decide": {
                    "Type": "Choice",
                    "Choices": [
                        {"Not": {"Variable": "$.x", "IsNull": true}, "Next": "Done"}
                    ],
                    "Default": "Done"
                },
                "Done": {"Type": "Succeed"}
            }
        }),
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::NotImplementedBooleanRule(_)));
}

#[test]
fn every_node_is_reachable_and_terminates_at_end() {
    let dag = compile(
        json!({
            "StartAt": "Fork",
            "States": {
                "Fork": {
                    "Type": "Parallel",
                    "Branches": [
                        {
                            "StartAt": "Pick",
                            "States": {
                                "Pick": {
                                    "Type": "Choice",
                                    "Choices": [{"Variable": "$.go", "BooleanEquals": true, "Next": "Go"}],
                                    "Default": "Stay"
                                },
                                "Go": {"Type": "Task", "Resource": "inc", "End": true},
                                "Stay": {"Type": "Pass", "End": true}
                            }
                        },
                        {"StartAt": "Right", "States": {"Right": {"Type": "Task", "Resource": "double", "End": true}}}
                    ],
                    "Next": "Tail"
                },
                "Tail": {"Type": "Task", "Resource": "inc", "End": true}
            }
        }),
        &["inc", "double"],
    )
    .unwrap();

    // One start, one end, all nodes reachable (build() enforces this; we
    // spot-check the shape here).
    assert_eq!(
        dag.nodes()
            .filter(|n| matches!(n.kind, NodeKind::Start { .. }))
            .count(),
        1
    );
    assert_eq!(
        dag.nodes()
            .filter(|n| matches!(n.kind, NodeKind::End))
            .count(),
        1
    );
    let fan_outs: Vec<_> = dag
        .nodes()
        .filter(|n| matches!(n.kind, NodeKind::FanOut { .. }))
        .collect();
    let fan_ins: Vec<_> = dag
        .nodes()
        .filter(|n| matches!(n.kind, NodeKind::FanIn { .. }))
        .collect();
    assert_eq!(fan_outs.len(), 1);
    assert_eq!(fan_ins.len(), 1);

    // The nested choice's alternatives stay inside the parallel region.
    let NodeKind::FanIn { next } = &fan_ins[0].kind else {
        unreachable!()
    };
    assert_eq!(next, "Tail");
}

#[test]
fn composition_resolves_the_function_set() {
    let registry = registry_with(&["inc", "double"]);
    let document = serde_json::to_vec(&json!({
        "StartAt": "A",
        "States": {
            "A": {"Type": "Task", "Resource": "inc", "Next": "B"},
            "B": {"Type": "Task", "Resource": "double", "End": true}
        }
    }))
    .unwrap();

    let composition = Composition::from_asl("pipeline", &document, &registry).unwrap();
    assert_eq!(composition.name, "pipeline");
    assert_eq!(composition.functions.len(), 2);
    assert_eq!(composition.function("inc").unwrap().memory_mb, 128);
    assert!(composition.function("missing").is_none());
}

#[test]
fn composition_registration_aborts_on_parse_errors() {
    let registry = registry_with(&[]);
    let err = Composition::from_asl("broken", b"not json", &registry).unwrap_err();
    assert!(matches!(err, CoreError::Parse(_)));
}

#[test]
fn dag_display_lists_every_node() {
    let dag = compile(
        json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Task", "Resource": "inc", "End": true}}
        }),
        &["inc"],
    )
    .unwrap();
    let rendered = dag.to_string();
    assert!(rendered.contains("(A)"));
    assert!(rendered.contains("Start"));
    assert!(rendered.contains("End"));
}
