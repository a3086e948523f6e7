// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registered compositions.
//!
//! A composition pairs a compiled DAG with the resolved set of functions
//! it invokes. Registration parses the submitted document, lowers it, and
//! resolves every referenced function through the registry; any failure
//! aborts registration.

use std::collections::HashMap;

use strato_asl::StateMachine;

use crate::dag::{Dag, from_state_machine};
use crate::error::{CompileError, CoreError};
use crate::function::{Function, FunctionRegistry};

/// A named, reusable workflow: parsed document, compiled DAG, and the
/// resolved function set.
#[derive(Debug, Clone)]
pub struct Composition {
    /// Registration name.
    pub name: String,
    /// The executable graph. Read-only during execution.
    pub dag: Dag,
    /// Resolved function metadata, keyed by function name.
    pub functions: HashMap<String, Function>,
}

impl Composition {
    /// Build a composition from a state-language document.
    pub fn from_asl(
        name: impl Into<String>,
        document: &[u8],
        registry: &dyn FunctionRegistry,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let machine = StateMachine::parse(name.clone(), document)?;
        Self::from_state_machine(name, &machine, registry)
    }

    /// Build a composition from an already-parsed state machine.
    pub fn from_state_machine(
        name: impl Into<String>,
        machine: &StateMachine,
        registry: &dyn FunctionRegistry,
    ) -> Result<Self, CoreError> {
        let dag = from_state_machine(machine, registry)?;

        let mut functions = HashMap::new();
        for function_name in machine.function_names() {
            let function = registry
                .get(&function_name)
                .ok_or(CompileError::UnknownFunction(function_name))?;
            functions.insert(function.name.clone(), function);
        }

        Ok(Self {
            name: name.into(),
            dag,
            functions,
        })
    }

    /// Resolved metadata of one of the composition's functions.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}
