// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for composition compilation and progress tracking.

use thiserror::Error;

use crate::progress::NodeStatus;

/// Result type using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Unified error surfaced by the core to its callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The state-language document failed to parse or validate.
    #[error("parse error: {0}")]
    Parse(#[from] strato_asl::AslError),

    /// Lowering the state machine to a DAG failed.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// A progress ledger operation failed.
    #[error("progress error: {0}")]
    Progress(#[from] ProgressError),

    /// The durable progress store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Progress (de)serialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from lowering a state machine to an executable DAG.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// A `Task` state references a function the registry does not know.
    #[error("unknown function '{0}' referenced by a task state")]
    UnknownFunction(String),

    /// The state kind is reserved and not supported by the compiler.
    #[error("state '{state}' has unsupported type '{state_type}'")]
    UnsupportedState {
        /// Name of the offending state.
        state: String,
        /// The reserved state type.
        state_type: &'static str,
    },

    /// The choice comparison operator is reserved and not implemented.
    #[error("comparison operator '{operator}' in state '{state}' is not implemented")]
    NotImplementedOperator {
        /// Name of the choice state holding the rule.
        state: String,
        /// The reserved operator name.
        operator: String,
    },

    /// Composite boolean choice rules are reserved and not implemented.
    #[error("boolean-expression choice rules are not implemented (state '{0}')")]
    NotImplementedBooleanRule(String),

    /// Two states would produce DAG nodes with the same id.
    #[error("state name '{0}' occurs in more than one branch")]
    DuplicateState(String),

    /// A `Wait` state has no usable duration field.
    #[error("wait state '{state}' is invalid: {reason}")]
    InvalidWait {
        /// Name of the wait state.
        state: String,
        /// Why the duration could not be compiled.
        reason: String,
    },

    /// The builder produced a structurally invalid graph.
    #[error("malformed graph: {0}")]
    MalformedGraph(String),
}

/// Errors from progress-ledger operations.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    /// The ledger holds no node with the given id.
    #[error("no node with id '{0}' exists for this request")]
    UnknownNode(String),

    /// The requested status change violates the monotonic transition rule.
    #[error("node '{node}' cannot transition from {from} to {to}")]
    InvalidTransition {
        /// Node whose status was to change.
        node: String,
        /// Current status.
        from: NodeStatus,
        /// Rejected target status.
        to: NodeStatus,
    },

    /// A batch was requested after a node failure was recorded.
    #[error("the execution is failed")]
    ExecutionFailed,
}

/// Error from the durable progress store.
#[derive(Debug, Error)]
#[error("progress store error: {0}")]
pub struct StoreError(
    /// Backend-reported reason.
    pub String,
);
