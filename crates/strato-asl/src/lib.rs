// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State-language document model for Strato.
//!
//! This crate decodes composition documents written in a JSON state-language
//! dialect into a typed [`StateMachine`], and validates the reference paths
//! used as state I/O selectors. Lowering to an executable graph lives in
//! `strato-core`; this crate is purely the document model.

#![deny(missing_docs)]

mod error;
mod path;
mod states;

pub use error::{AslError, Result};
pub use path::ReferencePath;
pub use states::{
    BooleanRule, ChoiceRule, ChoiceState, ComparisonKind, DataTestRule, FailState, MapState,
    ParallelState, PassState, State, StateMachine, SucceedState, TaskState, WaitState,
};
