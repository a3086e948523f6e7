// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executable DAG model.
//!
//! A compiled composition is a graph of tagged nodes with a distinguished
//! start and end. Nodes reference their successors by id, so the structure
//! is an acyclic id-graph even though a fan-out and its matching fan-in
//! are mutually aware; backward lookups go through a reverse index
//! computed once at build time.

mod builder;
mod compile;

pub use builder::{BranchTarget, DagBuilder, SubDag};
pub use compile::from_state_machine;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::condition::Condition;

/// Identifier of a DAG node, stable across workers. For nodes lowered
/// from states this is the state name.
pub type NodeId = String;

/// Reserved id of the start node.
pub const START_NODE_ID: &str = "__start__";
/// Reserved id of the end node.
pub const END_NODE_ID: &str = "__end__";

/// A single node of the executable graph.
#[derive(Debug, Clone)]
pub struct DagNode {
    /// Stable identifier.
    pub id: NodeId,
    /// Branch index within the enclosing choice/parallel alternative,
    /// used as a tie-breaker when ordering nodes of the same group.
    pub branch: u32,
    /// Variant data, including successor ids.
    pub kind: NodeKind,
}

/// Node variants. Dispatch happens on this tag at scheduling time.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Entry node; exactly one per DAG.
    Start {
        /// Successor id.
        next: NodeId,
    },
    /// Exit node; exactly one per DAG, every path terminates here.
    End,
    /// One unit of work: a function invocation or a pure-data transform.
    Simple {
        /// Successor id.
        next: NodeId,
        /// What executing this node means.
        work: Work,
    },
    /// Conditional branching. `alternatives[i]` is guarded by
    /// `conditions[i]`; the last condition is the constant-true default.
    Choice {
        /// Guards, in rule declaration order, default last.
        conditions: Vec<Condition>,
        /// Successor id per condition. Several conditions may share one.
        alternatives: Vec<NodeId>,
        /// All node ids belonging to each alternative's sub-graph; used
        /// for skip-propagation when the choice resolves.
        alternative_members: Vec<Vec<NodeId>>,
    },
    /// Parallel fan-out; opens the region closed by `fan_in`.
    FanOut {
        /// First node of each parallel branch.
        branches: Vec<NodeId>,
        /// The matching synchronization barrier.
        fan_in: NodeId,
    },
    /// Synchronization barrier joining all branches of one fan-out.
    FanIn {
        /// Successor id.
        next: NodeId,
    },
}

/// What executing a [`NodeKind::Simple`] node does.
#[derive(Debug, Clone)]
pub enum Work {
    /// Invoke the named function in a sandbox.
    Function(String),
    /// Identity transform, optionally injecting a literal result.
    Identity {
        /// Literal injected by a `Pass` state, if any.
        result: Option<Value>,
    },
    /// Sleep for the given specification.
    Sleep(WaitSpec),
    /// Terminate the request as failed.
    Abort {
        /// Machine-readable error name from the `Fail` state.
        error: Option<String>,
        /// Human-readable cause from the `Fail` state.
        cause: Option<String>,
    },
}

/// Duration of a lowered `Wait` state.
#[derive(Debug, Clone)]
pub enum WaitSpec {
    /// Sleep a fixed number of seconds.
    Seconds(u64),
    /// Sleep until the given instant; already-past instants do not sleep.
    Until(DateTime<Utc>),
}

impl DagNode {
    /// Successor ids of this node, in branch order where that matters.
    pub fn successors(&self) -> Vec<&NodeId> {
        match &self.kind {
            NodeKind::Start { next } | NodeKind::Simple { next, .. } | NodeKind::FanIn { next } => {
                vec![next]
            }
            NodeKind::End => vec![],
            NodeKind::Choice { alternatives, .. } => {
                // Shared alternatives appear once.
                let mut seen = Vec::new();
                for alt in alternatives {
                    if !seen.contains(&alt) {
                        seen.push(alt);
                    }
                }
                seen
            }
            NodeKind::FanOut { branches, .. } => {
                let mut seen = Vec::new();
                for branch in branches {
                    if !seen.contains(&branch) {
                        seen.push(branch);
                    }
                }
                seen
            }
        }
    }
}

/// A compiled, validated execution graph. Read-only during execution:
/// per-request state lives in the progress ledger, never here.
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: BTreeMap<NodeId, DagNode>,
    predecessors: HashMap<NodeId, Vec<NodeId>>,
}

impl Dag {
    pub(crate) fn new(
        nodes: BTreeMap<NodeId, DagNode>,
        predecessors: HashMap<NodeId, Vec<NodeId>>,
    ) -> Self {
        Self {
            nodes,
            predecessors,
        }
    }

    /// Id of the start node.
    pub fn start_id(&self) -> &str {
        START_NODE_ID
    }

    /// Id of the end node.
    pub fn end_id(&self) -> &str {
        END_NODE_ID
    }

    /// Look up a node by id.
    pub fn find(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    /// All nodes, keyed by id.
    pub fn nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.values()
    }

    /// Number of nodes, including start and end.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A DAG always holds at least its start and end nodes.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Predecessor ids of a node, from the reverse index.
    pub fn predecessors(&self, id: &str) -> &[NodeId] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl std::fmt::Display for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dag ({} nodes)", self.nodes.len())?;
        for node in self.nodes.values() {
            let successors: Vec<&str> = node.successors().iter().map(|s| s.as_str()).collect();
            writeln!(
                f,
                "  |{}| {:<7} ({}) -> [{}]",
                node.branch,
                kind_name(&node.kind),
                node.id,
                successors.join(", ")
            )?;
        }
        Ok(())
    }
}

pub(crate) fn kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Start { .. } => "Start",
        NodeKind::End => "End",
        NodeKind::Simple { .. } => "Simple",
        NodeKind::Choice { .. } => "Choice",
        NodeKind::FanOut { .. } => "FanOut",
        NodeKind::FanIn { .. } => "FanIn",
    }
}
