// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for state-language parsing.

use thiserror::Error;

/// Errors produced while decoding or validating a state-language document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AslError {
    /// A reference path does not start with `$`.
    #[error("a reference path must start with a '$' character: {0:?}")]
    PathMissingRoot(String),

    /// A reference path contains one of the forbidden characters.
    #[error("a reference path must not contain any of '@' ',' ':' '?': {0:?}")]
    PathForbiddenCharacter(String),

    /// The document is not valid JSON for the expected shape.
    #[error("malformed state-language document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `StartAt` state does not exist in the `States` map.
    #[error("start state '{0}' is not defined")]
    UnknownStartState(String),

    /// A `Next` or `Default` field references a state that does not exist.
    #[error("state '{from}' references unknown state '{to}'")]
    UnknownNextState {
        /// State holding the dangling reference.
        from: String,
        /// The referenced name that did not resolve.
        to: String,
    },

    /// A state is not reachable from the start state.
    #[error("state '{0}' is unreachable from the start state")]
    UnreachableState(String),

    /// Following `Next` references revisits a state.
    #[error("state machine contains a cycle through '{0}'")]
    Cycle(String),

    /// A choice state has no `Default` branch.
    #[error("choice state '{0}' must name a 'Default' branch")]
    MissingDefault(String),

    /// A non-terminal state has neither `Next` nor `End: true`.
    #[error("state '{0}' must set either 'Next' or 'End: true'")]
    DanglingState(String),
}

/// Result type for state-language operations.
pub type Result<T> = std::result::Result<T, AslError>;
