// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function metadata and the registry seam.
//!
//! The registry is an external collaborator; the core only needs the
//! lookup. [`InMemoryFunctionRegistry`] is provided for tests and for
//! embedding the orchestrator without a shared registry service.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Metadata of a deployable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Registry key.
    pub name: String,
    /// Container image the function runs in.
    pub image: String,
    /// Memory limit for the sandbox, in MiB.
    pub memory_mb: i64,
    /// CPU quota in `(0, 1]` of a core; `0` means unlimited.
    pub cpu_quota: f64,
    /// Handler entry point passed to the in-container executor.
    pub handler: String,
    /// Directory the handler lives in inside the container.
    pub handler_dir: String,
    /// Argv used to launch the handler; empty falls back to the
    /// container's `CUSTOM_CMD`.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Lookup seam over the function registry.
pub trait FunctionRegistry: Send + Sync {
    /// Fetch a function by name. `None` when the name is unknown.
    fn get(&self, name: &str) -> Option<Function>;
}

/// Registry backed by a process-local map.
#[derive(Default)]
pub struct InMemoryFunctionRegistry {
    functions: RwLock<HashMap<String, Function>>,
}

impl InMemoryFunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a function.
    pub fn register(&self, function: Function) {
        self.functions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(function.name.clone(), function);
    }
}

impl FunctionRegistry for InMemoryFunctionRegistry {
    fn get(&self, name: &str) -> Option<Function> {
        self.functions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}
