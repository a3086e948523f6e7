// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Strato Core - Composition Compiler and Progress Tracking
//!
//! This crate turns a parsed state-language document into an executable
//! DAG and tracks per-request execution progress so that any worker in a
//! cluster can resume a request.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      strato-environment                      │
//! │        (container factory, invoker, request driver)          │
//! └──────────────────────────────────────────────────────────────┘
//!                │ compiles & schedules        │ persists
//!                ▼                             ▼
//! ┌───────────────────────────┐   ┌────────────────────────────┐
//! │       strato-core         │   │      Progress store        │
//! │  (this crate)             │──▶│  (key-value collaborator)  │
//! │  ASL→DAG, progress ledger │   └────────────────────────────┘
//! └───────────────────────────┘
//!                │ parses
//!                ▼
//! ┌───────────────────────────┐
//! │        strato-asl         │
//! │   (document model)        │
//! └───────────────────────────┘
//! ```
//!
//! # Scheduling model
//!
//! [`Progress::init`] linearizes a DAG into groups: nodes sharing a group
//! are mutually independent and run concurrently; a batch strictly
//! precedes the next one. [`Progress::next_nodes`] computes the minimum
//! pending group; the ledger, not the DAG, is the sole source of truth
//! for what runs next, and it serializes to JSON for the durable store.
//!
//! # Modules
//!
//! - [`cache`]: write-through progress cache over the durable store
//! - [`composition`]: registered workflow (DAG + resolved functions)
//! - [`condition`]: boolean guards for choice alternatives
//! - [`dag`]: node model, fluent builder, and the ASL→DAG compiler
//! - [`error`]: error taxonomy for parse/compile/progress/store failures
//! - [`function`]: function metadata and the registry seam
//! - [`progress`]: per-request node-status ledger
//! - [`store`]: durable key-value store seam

#![deny(missing_docs)]

/// Write-through progress cache over the durable store.
pub mod cache;

/// Registered workflow: compiled DAG plus resolved function set.
pub mod composition;

/// Boolean conditions guarding choice alternatives.
pub mod condition;

/// Executable DAG model, builder, and compiler.
pub mod dag;

/// Error types for core operations.
pub mod error;

/// Function metadata and registry seam.
pub mod function;

/// Per-request progress ledger.
pub mod progress;

/// Durable progress store seam.
pub mod store;

pub use cache::ProgressCache;
pub use composition::Composition;
pub use condition::{Condition, Operand};
pub use error::{CompileError, CoreError, ProgressError, Result, StoreError};
pub use function::{Function, FunctionRegistry, InMemoryFunctionRegistry};
pub use progress::{NodeInfo, NodeStatus, NodeType, Progress};
pub use store::{InMemoryStore, ProgressStore};
