// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lowering a parsed state machine to an executable DAG.
//!
//! Each state becomes a node with the state name as its id. Task states
//! resolve their resource through the registry; `Pass` and `Wait` lower to
//! pure-data simple nodes; `Parallel` becomes a fan-out/fan-in pair;
//! `Choice` becomes a choice node whose last alternative is the synthetic
//! constant-true default. `Map` is reserved and fails deterministically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use strato_asl::{ChoiceRule, ChoiceState, State, StateMachine, WaitState};

use crate::condition::{Condition, compile_rule};
use crate::error::CompileError;
use crate::function::FunctionRegistry;

use super::builder::{BranchTarget, DagBuilder, SubDag};
use super::{Dag, WaitSpec, Work};

/// Compile a validated state machine into a DAG.
pub fn from_state_machine(
    machine: &StateMachine,
    registry: &dyn FunctionRegistry,
) -> Result<Dag, CompileError> {
    let mut builder = DagBuilder::new();
    compile_chain(machine, &machine.start_at, &mut builder, registry)?;
    builder.build()
}

fn compile_sub(
    machine: &StateMachine,
    start: &str,
    branch: u32,
    registry: &dyn FunctionRegistry,
) -> Result<SubDag, CompileError> {
    let mut builder = DagBuilder::with_branch(branch);
    compile_chain(machine, start, &mut builder, registry)?;
    builder.into_sub()
}

/// Compile the chain of states beginning at `start`, appending onto
/// `builder` until a terminal state or a choice ends the chain.
fn compile_chain(
    machine: &StateMachine,
    start: &str,
    builder: &mut DagBuilder,
    registry: &dyn FunctionRegistry,
) -> Result<(), CompileError> {
    let mut current = Some(start.to_string());
    while let Some(name) = current.take() {
        let state = machine.state(&name).ok_or_else(|| {
            CompileError::MalformedGraph(format!("state '{name}' vanished during lowering"))
        })?;

        match state {
            State::Task(task) => {
                if registry.get(&task.resource).is_none() {
                    return Err(CompileError::UnknownFunction(task.resource.clone()));
                }
                builder.add_simple(name.clone(), Work::Function(task.resource.clone()))?;
                current = task.next.clone();
            }
            State::Pass(pass) => {
                builder.add_simple(
                    name.clone(),
                    Work::Identity {
                        result: pass.result.clone(),
                    },
                )?;
                current = pass.next.clone();
            }
            State::Wait(wait) => {
                builder.add_simple(name.clone(), Work::Sleep(wait_spec(&name, wait)?))?;
                current = wait.next.clone();
            }
            State::Parallel(parallel) => {
                builder.add_fan_out(name.clone(), parallel.branches.len())?;
                for (index, branch) in parallel.branches.iter().enumerate() {
                    let sub = compile_sub(branch, &branch.start_at, index as u32, registry)?;
                    builder.next_branch(BranchTarget::Sub(sub))?;
                }
                current = parallel.next.clone();
            }
            State::Choice(choice) => {
                compile_choice(machine, &name, choice, builder, registry)?;
            }
            State::Map(_) => {
                return Err(CompileError::UnsupportedState {
                    state: name,
                    state_type: "Map",
                });
            }
            State::Succeed(_) => {}
            State::Fail(fail) => {
                builder.add_simple(
                    name.clone(),
                    Work::Abort {
                        error: fail.error.clone(),
                        cause: fail.cause.clone(),
                    },
                )?;
            }
        }
    }
    Ok(())
}

/// Compile a choice state: one condition per rule in declaration order,
/// the constant-true default last, and one alternative sub-graph per
/// distinct successor. The choice ends the enclosing chain.
fn compile_choice(
    machine: &StateMachine,
    name: &str,
    choice: &ChoiceState,
    builder: &mut DagBuilder,
    registry: &dyn FunctionRegistry,
) -> Result<(), CompileError> {
    let mut conditions = Vec::with_capacity(choice.choices.len() + 1);
    let mut heads = Vec::with_capacity(choice.choices.len() + 1);
    for rule in &choice.choices {
        match rule {
            ChoiceRule::DataTest(rule) => {
                conditions.push(compile_rule(name, rule)?);
                heads.push(rule.next.clone());
            }
            ChoiceRule::Boolean(_) => {
                return Err(CompileError::NotImplementedBooleanRule(name.to_string()));
            }
        }
    }
    conditions.push(Condition::Const(true));
    heads.push(choice.default.clone().ok_or_else(|| {
        CompileError::MalformedGraph(format!("choice '{name}' lost its default branch"))
    })?);

    builder.add_choice(name, conditions)?;
    let mut attached: HashMap<&str, usize> = HashMap::new();
    for (index, head) in heads.iter().enumerate() {
        match attached.get(head.as_str()) {
            Some(&shared) => {
                builder.next_branch(BranchTarget::Shared(shared))?;
            }
            None => {
                let sub = compile_sub(machine, head, index as u32, registry)?;
                builder.next_branch(BranchTarget::Sub(sub))?;
                attached.insert(head.as_str(), index);
            }
        }
    }
    Ok(())
}

fn wait_spec(name: &str, wait: &WaitState) -> Result<WaitSpec, CompileError> {
    if let Some(seconds) = wait.seconds {
        return Ok(WaitSpec::Seconds(seconds));
    }
    if let Some(timestamp) = &wait.timestamp {
        let instant = DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
            CompileError::InvalidWait {
                state: name.to_string(),
                reason: format!("bad timestamp '{timestamp}': {e}"),
            }
        })?;
        return Ok(WaitSpec::Until(instant.with_timezone(&Utc)));
    }
    if wait.seconds_path.is_some() || wait.timestamp_path.is_some() {
        return Err(CompileError::InvalidWait {
            state: name.to_string(),
            reason: "path-based wait durations are not implemented".to_string(),
        });
    }
    Err(CompileError::InvalidWait {
        state: name.to_string(),
        reason: "no duration given".to_string(),
    })
}
