// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed model of the state-language document.
//!
//! A composition is submitted as a JSON state machine: a start state and a
//! mapping from state name to state. [`StateMachine::parse`] decodes the
//! document and validates its structure (references resolve, the graph is
//! acyclic, every path reaches a terminal state). Unknown JSON fields are
//! ignored so documents written for richer dialects still load.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{AslError, Result};
use crate::path::ReferencePath;

/// A parsed, validated state machine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachine {
    /// Name the machine was registered under. Not part of the document.
    #[serde(skip)]
    pub name: String,
    /// Free-form document comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Name of the state execution begins at.
    pub start_at: String,
    /// All states, keyed by name.
    pub states: BTreeMap<String, State>,
}

/// A single state of the machine, tagged by its `Type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type")]
pub enum State {
    /// Invokes a named function resource.
    Task(TaskState),
    /// Ordered conditional branching with a default.
    Choice(ChoiceState),
    /// Independent parallel branches, each a sub-machine.
    Parallel(ParallelState),
    /// Reserved; rejected at compile time.
    Map(MapState),
    /// Identity / injection state.
    Pass(PassState),
    /// Sleep for a duration or until a timestamp.
    Wait(WaitState),
    /// Successful terminal state.
    Succeed(SucceedState),
    /// Failing terminal state.
    Fail(FailState),
}

/// `Task` state body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    /// Name of the function to invoke, resolved through the registry.
    pub resource: String,
    /// Successor state name.
    #[serde(default)]
    pub next: Option<String>,
    /// Terminal marker; mutually exclusive with `next`.
    #[serde(default)]
    pub end: bool,
}

/// `Choice` state body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    /// Rules evaluated in declaration order.
    pub choices: Vec<ChoiceRule>,
    /// State taken when no rule matches.
    #[serde(default)]
    pub default: Option<String>,
}

/// `Parallel` state body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    /// One sub-machine per branch.
    pub branches: Vec<StateMachine>,
    /// Successor state name.
    #[serde(default)]
    pub next: Option<String>,
    /// Terminal marker.
    #[serde(default)]
    pub end: bool,
}

/// `Map` state body. Parsed but unsupported; compilation rejects it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapState {
    /// Successor state name.
    #[serde(default)]
    pub next: Option<String>,
    /// Terminal marker.
    #[serde(default)]
    pub end: bool,
}

/// `Pass` state body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassState {
    /// Literal result injected in place of the input, if any.
    #[serde(default)]
    pub result: Option<Value>,
    /// Successor state name.
    #[serde(default)]
    pub next: Option<String>,
    /// Terminal marker.
    #[serde(default)]
    pub end: bool,
}

/// `Wait` state body. Exactly one of the four duration fields is expected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitState {
    /// Sleep for a fixed number of seconds.
    #[serde(default)]
    pub seconds: Option<u64>,
    /// Sleep until an RFC 3339 timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Seconds taken from the input at a reference path.
    #[serde(default)]
    pub seconds_path: Option<ReferencePath>,
    /// Timestamp taken from the input at a reference path.
    #[serde(default)]
    pub timestamp_path: Option<ReferencePath>,
    /// Successor state name.
    #[serde(default)]
    pub next: Option<String>,
    /// Terminal marker.
    #[serde(default)]
    pub end: bool,
}

/// `Succeed` state body.
#[derive(Debug, Clone, Deserialize)]
pub struct SucceedState {}

/// `Fail` state body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    /// Machine-readable error name.
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable failure cause.
    #[serde(default)]
    pub cause: Option<String>,
}

/// Comparison operator of a data-test choice rule.
///
/// Only a subset compiles to an executable condition; the rest are
/// recognized so documents parse, and rejected explicitly at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[allow(missing_docs)]
pub enum ComparisonKind {
    StringEquals,
    StringEqualsPath,
    StringLessThan,
    StringLessThanPath,
    StringGreaterThan,
    StringGreaterThanPath,
    StringLessThanEquals,
    StringLessThanEqualsPath,
    StringGreaterThanEquals,
    StringGreaterThanEqualsPath,
    StringMatches,
    NumericEquals,
    NumericEqualsPath,
    NumericLessThan,
    NumericLessThanPath,
    NumericGreaterThan,
    NumericGreaterThanPath,
    NumericLessThanEquals,
    NumericLessThanEqualsPath,
    NumericGreaterThanEquals,
    NumericGreaterThanEqualsPath,
    BooleanEquals,
    BooleanEqualsPath,
    TimestampEquals,
    TimestampEqualsPath,
    TimestampLessThan,
    TimestampLessThanPath,
    TimestampGreaterThan,
    TimestampGreaterThanPath,
    TimestampLessThanEquals,
    TimestampLessThanEqualsPath,
    TimestampGreaterThanEquals,
    TimestampGreaterThanEqualsPath,
    IsNull,
    IsPresent,
    IsNumeric,
    IsString,
    IsBoolean,
    IsTimestamp,
}

/// A single choice rule.
#[derive(Debug, Clone)]
pub enum ChoiceRule {
    /// `{Variable, <operator>: operand, Next}`.
    DataTest(DataTestRule),
    /// Composite `And`/`Or`/`Not` rule. Reserved; rejected at compile time.
    Boolean(BooleanRule),
}

impl ChoiceRule {
    /// Successor state taken when the rule matches.
    pub fn next_state(&self) -> &str {
        match self {
            ChoiceRule::DataTest(rule) => &rule.next,
            ChoiceRule::Boolean(rule) => &rule.next,
        }
    }
}

/// Data-test choice rule: compare the value at `variable` with `operand`.
#[derive(Debug, Clone)]
pub struct DataTestRule {
    /// Path to the tested value in the request input.
    pub variable: ReferencePath,
    /// Comparison operator.
    pub kind: ComparisonKind,
    /// Literal operand of the comparison.
    pub operand: Value,
    /// Successor state when the test holds.
    pub next: String,
}

/// Composite boolean choice rule. The sub-expressions are carried opaquely.
#[derive(Debug, Clone)]
pub struct BooleanRule {
    /// Successor state when the expression holds.
    pub next: String,
}

impl<'de> Deserialize<'de> for ChoiceRule {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let fields = serde_json::Map::deserialize(deserializer)?;
        let next = fields
            .get("Next")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("choice rule is missing 'Next'"))?
            .to_string();

        if ["And", "Or", "Not"].iter().any(|k| fields.contains_key(*k)) {
            return Ok(ChoiceRule::Boolean(BooleanRule { next }));
        }

        let (kind, operand) = fields
            .iter()
            .find_map(|(key, value)| {
                key.parse::<ComparisonKind>()
                    .ok()
                    .map(|kind| (kind, value.clone()))
            })
            .ok_or_else(|| D::Error::custom("choice rule has no recognized comparison operator"))?;

        let variable = fields
            .get("Variable")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("choice rule is missing 'Variable'"))?;
        let variable = ReferencePath::parse(variable).map_err(D::Error::custom)?;

        Ok(ChoiceRule::DataTest(DataTestRule {
            variable,
            kind,
            operand,
            next,
        }))
    }
}

impl StateMachine {
    /// Decode and validate a state-language document.
    pub fn parse(name: impl Into<String>, document: &[u8]) -> Result<Self> {
        let mut machine: StateMachine = serde_json::from_slice(document)?;
        machine.name = name.into();
        machine.validate()?;
        Ok(machine)
    }

    /// Look up a state by name.
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// Names of every function resource referenced by a `Task` state,
    /// deduplicated, including parallel branches.
    pub fn function_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        self.collect_function_names(&mut seen, &mut names);
        names
    }

    fn collect_function_names(&self, seen: &mut HashSet<String>, names: &mut Vec<String>) {
        for state in self.states.values() {
            match state {
                State::Task(task) => {
                    if seen.insert(task.resource.clone()) {
                        names.push(task.resource.clone());
                    }
                }
                State::Parallel(parallel) => {
                    for branch in &parallel.branches {
                        branch.collect_function_names(seen, names);
                    }
                }
                _ => {}
            }
        }
    }

    /// Structural validation: references resolve, every state is reachable,
    /// no cycles, every non-terminal state names a successor.
    fn validate(&self) -> Result<()> {
        if !self.states.contains_key(&self.start_at) {
            return Err(AslError::UnknownStartState(self.start_at.clone()));
        }

        let mut visited = HashSet::new();
        self.walk(&self.start_at, &mut visited, &mut Vec::new())?;

        for name in self.states.keys() {
            if !visited.contains(name.as_str()) {
                return Err(AslError::UnreachableState(name.clone()));
            }
        }
        Ok(())
    }

    fn walk<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Result<()> {
        if stack.contains(&name) {
            return Err(AslError::Cycle(name.to_string()));
        }
        let state = self
            .states
            .get(name)
            .ok_or_else(|| AslError::UnknownNextState {
                from: stack.last().unwrap_or(&"<start>").to_string(),
                to: name.to_string(),
            })?;
        if !visited.insert(name) {
            return Ok(());
        }
        stack.push(name);

        match state {
            State::Task(TaskState { next, end, .. })
            | State::Parallel(ParallelState { next, end, .. })
            | State::Map(MapState { next, end })
            | State::Pass(PassState { next, end, .. })
            | State::Wait(WaitState { next, end, .. }) => {
                match next {
                    Some(next) => self.walk(next, visited, stack)?,
                    None if *end => {}
                    None => {
                        stack.pop();
                        return Err(AslError::DanglingState(name.to_string()));
                    }
                }
                if let State::Parallel(parallel) = state {
                    for branch in &parallel.branches {
                        branch.validate()?;
                    }
                }
            }
            State::Choice(choice) => {
                for rule in &choice.choices {
                    self.walk(rule.next_state(), visited, stack)?;
                }
                match &choice.default {
                    Some(default) => self.walk(default, visited, stack)?,
                    None => {
                        stack.pop();
                        return Err(AslError::MissingDefault(name.to_string()));
                    }
                }
            }
            State::Succeed(_) | State::Fail(_) => {}
        }

        stack.pop();
        Ok(())
    }
}

impl State {
    /// The successor state name, if this state is not terminal.
    pub fn next_state(&self) -> Option<&str> {
        match self {
            State::Task(TaskState { next, .. })
            | State::Parallel(ParallelState { next, .. })
            | State::Map(MapState { next, .. })
            | State::Pass(PassState { next, .. })
            | State::Wait(WaitState { next, .. }) => next.as_deref(),
            State::Choice(_) | State::Succeed(_) | State::Fail(_) => None,
        }
    }

    /// Whether execution ends at this state.
    pub fn is_terminal(&self) -> bool {
        match self {
            State::Task(TaskState { end, .. })
            | State::Parallel(ParallelState { end, .. })
            | State::Map(MapState { end, .. })
            | State::Pass(PassState { end, .. })
            | State::Wait(WaitState { end, .. }) => *end,
            State::Succeed(_) | State::Fail(_) => true,
            State::Choice(_) => false,
        }
    }
}
