// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-request progress ledger.
//!
//! Progress is the sole source of truth for "what runs next": the DAG is
//! read-only during execution. Each node carries a group label assigned
//! at initialization such that nodes sharing a group are mutually
//! independent and may run concurrently; the end node's group is strictly
//! greater than any other. The ledger serializes to JSON, so any worker
//! holding the composition can resume a request from the durable store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::dag::{Dag, NodeId, NodeKind};
use crate::error::ProgressError;

/// Execution status of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum NodeStatus {
    /// Not yet executed.
    Pending,
    /// Finished successfully.
    Executed,
    /// Pruned without running; skipping propagates to a node's whole
    /// dead branch.
    Skipped,
    /// Finished unsuccessfully.
    Failed,
    /// A fan-in selected before all of its predecessors completed.
    /// Visible to operators, never terminal.
    Waiting,
}

/// Ledger-level node classification, mirroring the DAG node tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum NodeType {
    /// Entry node.
    Start,
    /// Exit node.
    End,
    /// Function invocation or pure-data transform.
    Simple,
    /// Conditional branching.
    Choice,
    /// Parallel region opening.
    FanOut,
    /// Parallel region barrier.
    FanIn,
}

impl NodeType {
    fn of(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::Start { .. } => NodeType::Start,
            NodeKind::End => NodeType::End,
            NodeKind::Simple { .. } => NodeType::Simple,
            NodeKind::Choice { .. } => NodeType::Choice,
            NodeKind::FanOut { .. } => NodeType::FanOut,
            NodeKind::FanIn { .. } => NodeType::FanIn,
        }
    }
}

/// Scheduling view of one DAG node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node id, matching the DAG.
    pub id: NodeId,
    /// Node classification.
    pub node_type: NodeType,
    /// Current status.
    pub status: NodeStatus,
    /// Partial-order label; equal groups may run concurrently.
    pub group: u32,
    /// Tie-breaker within a group, from the enclosing alternative index.
    pub branch: u32,
}

/// Ledger of node statuses for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// The request this ledger belongs to.
    pub request_id: String,
    /// Nodes ordered by `(group, branch)`, end node last.
    pub nodes: Vec<NodeInfo>,
    /// Group of the most recently returned batch.
    pub next_group: u32,
    /// Fan-in id to predecessor ids, captured from the DAG's reverse
    /// index so the ledger is self-sufficient across workers.
    pub fan_in_deps: HashMap<NodeId, Vec<NodeId>>,
}

impl Progress {
    /// Build the ledger for a request by linearizing the DAG.
    ///
    /// Groups are assigned walking from the start node, each node taking
    /// one more than its predecessor; nodes reached through several
    /// predecessors adopt the maximum group observed. The end node moves
    /// to the tail with a group strictly greater than every other, and
    /// the list is stably re-sorted by `(group, branch)`.
    pub fn init(request_id: impl Into<String>, dag: &Dag) -> Self {
        let mut groups: HashMap<&str, u32> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        assign_groups(dag, dag.start_id(), 0, &mut groups, &mut order);

        let end_id = dag.end_id();
        let max_group = groups
            .iter()
            .filter(|(id, _)| **id != end_id)
            .map(|(_, group)| *group)
            .max()
            .unwrap_or(0);

        let mut nodes: Vec<NodeInfo> = order
            .iter()
            .filter(|id| **id != end_id)
            .filter_map(|id| {
                dag.find(id).map(|node| NodeInfo {
                    id: node.id.clone(),
                    node_type: NodeType::of(&node.kind),
                    status: NodeStatus::Pending,
                    group: groups[id],
                    branch: node.branch,
                })
            })
            .collect();
        nodes.push(NodeInfo {
            id: end_id.to_string(),
            node_type: NodeType::End,
            status: NodeStatus::Pending,
            group: max_group + 1,
            branch: 0,
        });
        nodes.sort_by_key(|node| (node.group, node.branch));

        let fan_in_deps = dag
            .nodes()
            .filter(|node| matches!(node.kind, NodeKind::FanIn { .. }))
            .map(|node| (node.id.clone(), dag.predecessors(&node.id).to_vec()))
            .collect();

        Self {
            request_id: request_id.into(),
            nodes,
            next_group: 0,
            fan_in_deps,
        }
    }

    /// Compute the next runnable batch: all pending nodes of the minimum
    /// pending group.
    ///
    /// Start and fan-out nodes carry no work; the scan completes them
    /// inline and advances. A fan-in is withheld (and marked
    /// [`NodeStatus::Waiting`]) until all of its predecessors are
    /// executed. Encountering a failed node before any runnable
    /// candidate fails the call; when nothing is pending the batch is
    /// empty and `next_group` is left unchanged.
    pub fn next_nodes(&mut self) -> Result<Vec<NodeId>, ProgressError> {
        loop {
            let mut candidate_group = None;
            for node in &self.nodes {
                match node.status {
                    NodeStatus::Failed => return Err(ProgressError::ExecutionFailed),
                    NodeStatus::Pending | NodeStatus::Waiting => {
                        candidate_group = Some(node.group);
                        break;
                    }
                    _ => {}
                }
            }
            let Some(group) = candidate_group else {
                return Ok(Vec::new());
            };

            let mut advanced = false;
            for node in self.nodes.iter_mut() {
                if node.group == group
                    && node.status == NodeStatus::Pending
                    && matches!(node.node_type, NodeType::Start | NodeType::FanOut)
                {
                    node.status = NodeStatus::Executed;
                    advanced = true;
                }
            }
            if advanced {
                continue;
            }

            let mut runnable = Vec::new();
            let mut newly_waiting = Vec::new();
            for (index, node) in self.nodes.iter().enumerate() {
                if node.group != group {
                    continue;
                }
                match (node.node_type, node.status) {
                    (NodeType::FanIn, NodeStatus::Pending | NodeStatus::Waiting) => {
                        if self.fan_in_ready(&node.id) {
                            runnable.push(node.id.clone());
                        } else if node.status == NodeStatus::Pending {
                            newly_waiting.push(index);
                        }
                    }
                    (_, NodeStatus::Pending) => runnable.push(node.id.clone()),
                    _ => {}
                }
            }
            for index in newly_waiting {
                self.nodes[index].status = NodeStatus::Waiting;
            }
            self.next_group = group;
            return Ok(runnable);
        }
    }

    fn fan_in_ready(&self, id: &str) -> bool {
        self.fan_in_deps.get(id).is_none_or(|deps| {
            deps.iter()
                .all(|dep| self.status_of(dep) == Some(NodeStatus::Executed))
        })
    }

    /// Mark a node executed.
    pub fn complete(&mut self, id: &str) -> Result<(), ProgressError> {
        self.transition(id, NodeStatus::Executed)
    }

    /// Mark a node skipped.
    pub fn skip(&mut self, id: &str) -> Result<(), ProgressError> {
        self.transition(id, NodeStatus::Skipped)
    }

    /// Mark a node failed.
    pub fn fail(&mut self, id: &str) -> Result<(), ProgressError> {
        self.transition(id, NodeStatus::Failed)
    }

    /// Skip every listed node that has not yet run. Used to prune the
    /// dead alternatives of a resolved choice; nodes already skipped by
    /// an earlier propagation are left alone.
    pub fn skip_all<I>(&mut self, ids: I) -> Result<(), ProgressError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for id in ids {
            let id = id.as_ref();
            match self
                .status_of(id)
                .ok_or_else(|| ProgressError::UnknownNode(id.to_string()))?
            {
                NodeStatus::Pending | NodeStatus::Waiting => self.skip(id)?,
                NodeStatus::Skipped => {}
                other => {
                    return Err(ProgressError::InvalidTransition {
                        node: id.to_string(),
                        from: other,
                        to: NodeStatus::Skipped,
                    });
                }
            }
        }
        Ok(())
    }

    /// True when no node is pending.
    pub fn is_completed(&self) -> bool {
        !self
            .nodes
            .iter()
            .any(|node| node.status == NodeStatus::Pending)
    }

    /// Ids of every node still pending or waiting, in ledger order.
    pub fn unfinished(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| {
                matches!(node.status, NodeStatus::Pending | NodeStatus::Waiting)
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// Scheduling view of a node.
    pub fn info(&self, id: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Group label of a node.
    pub fn group_of(&self, id: &str) -> Option<u32> {
        self.info(id).map(|node| node.group)
    }

    fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.info(id).map(|node| node.status)
    }

    fn transition(&mut self, id: &str, to: NodeStatus) -> Result<(), ProgressError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.id == id)
            .ok_or_else(|| ProgressError::UnknownNode(id.to_string()))?;
        let legal = matches!(
            (node.status, to),
            (
                NodeStatus::Pending,
                NodeStatus::Executed | NodeStatus::Skipped | NodeStatus::Failed | NodeStatus::Waiting
            ) | (
                NodeStatus::Waiting,
                NodeStatus::Executed | NodeStatus::Skipped | NodeStatus::Failed
            )
        );
        if !legal {
            return Err(ProgressError::InvalidTransition {
                node: id.to_string(),
                from: node.status,
                to,
            });
        }
        node.status = to;
        Ok(())
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Progress for composition request {} - G = node group, B = node branch",
            self.request_id
        )?;
        writeln!(f, "G. |B| Type   (        NodeId        ) - Status")?;
        writeln!(f, "-------------------------------------------------")?;
        for node in &self.nodes {
            writeln!(
                f,
                "{}. |{}| {:<6} ({:<22}) - {}",
                node.group, node.branch, node.node_type, node.id, node.status
            )?;
        }
        Ok(())
    }
}

/// Longest-path group assignment: revisits with a larger group win and
/// re-propagate, so a fan-in always lands after its slowest branch.
fn assign_groups<'a>(
    dag: &'a Dag,
    id: &'a str,
    group: u32,
    groups: &mut HashMap<&'a str, u32>,
    order: &mut Vec<&'a str>,
) {
    match groups.get(id) {
        Some(&existing) if existing >= group => return,
        Some(_) => {
            groups.insert(id, group);
        }
        None => {
            groups.insert(id, group);
            order.push(id);
        }
    }
    if let Some(node) = dag.find(id) {
        for successor in node.successors() {
            assign_groups(dag, successor, group + 1, groups, order);
        }
    }
}
