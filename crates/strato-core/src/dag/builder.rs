// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fluent DAG construction.
//!
//! The builder keeps a cursor on the most recently appended node; append
//! operations wire the cursor's out-edge to the new node and advance.
//! Choice and fan-out operations push a branch frame: completed sub-DAGs
//! are attached with [`DagBuilder::next_branch`] until
//! [`DagBuilder::has_next_branch`] turns false. [`DagBuilder::build`]
//! validates the connectivity invariants and emits the graph.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::condition::Condition;
use crate::error::CompileError;

use super::{Dag, DagNode, END_NODE_ID, NodeId, NodeKind, START_NODE_ID, Work};

/// A completed sub-graph produced by [`DagBuilder::into_sub`], ready to
/// be attached as a choice alternative or a parallel branch.
#[derive(Debug)]
pub struct SubDag {
    nodes: BTreeMap<NodeId, DagNode>,
    /// First node of the sub-graph; [`END_NODE_ID`] when the sub-graph
    /// terminates immediately.
    head: NodeId,
}

/// Target of a [`DagBuilder::next_branch`] call.
#[derive(Debug)]
pub enum BranchTarget {
    /// Attach a freshly compiled sub-graph.
    Sub(SubDag),
    /// Reuse the alternative attached at the given index. Only valid for
    /// choice frames, where several rules may name the same successor.
    Shared(usize),
}

#[derive(Debug)]
struct BranchFrame {
    owner: NodeId,
    remaining: usize,
    kind: FrameKind,
}

#[derive(Debug)]
enum FrameKind {
    Choice {
        alternatives: Vec<NodeId>,
        members: Vec<Vec<NodeId>>,
    },
    FanOut {
        fan_in: NodeId,
        branches: Vec<NodeId>,
    },
}

/// Incremental DAG constructor. See the module docs for the protocol.
#[derive(Debug)]
pub struct DagBuilder {
    nodes: BTreeMap<NodeId, DagNode>,
    cursor: Option<NodeId>,
    frames: Vec<BranchFrame>,
    branch: u32,
}

impl DagBuilder {
    /// Start a new graph holding only the start and end nodes.
    pub fn new() -> Self {
        Self::with_branch(0)
    }

    /// Start a new graph whose nodes carry the given branch label, for
    /// sub-graphs compiled inside a choice/parallel alternative.
    pub fn with_branch(branch: u32) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            START_NODE_ID.to_string(),
            DagNode {
                id: START_NODE_ID.to_string(),
                branch,
                kind: NodeKind::Start {
                    next: END_NODE_ID.to_string(),
                },
            },
        );
        nodes.insert(
            END_NODE_ID.to_string(),
            DagNode {
                id: END_NODE_ID.to_string(),
                branch,
                kind: NodeKind::End,
            },
        );
        Self {
            nodes,
            cursor: Some(START_NODE_ID.to_string()),
            frames: Vec::new(),
            branch,
        }
    }

    /// Append a simple node and advance the cursor to it.
    pub fn add_simple(&mut self, id: impl Into<String>, work: Work) -> Result<&mut Self, CompileError> {
        let id = id.into();
        self.insert_node(
            id.clone(),
            NodeKind::Simple {
                next: END_NODE_ID.to_string(),
                work,
            },
        )?;
        self.wire_cursor_to(&id)?;
        self.cursor = Some(id);
        Ok(self)
    }

    /// Append a choice node and open a branch frame with one slot per
    /// condition. The choice terminates the current chain: subsequent
    /// nodes belong to its alternatives.
    pub fn add_choice(
        &mut self,
        id: impl Into<String>,
        conditions: Vec<Condition>,
    ) -> Result<&mut Self, CompileError> {
        if conditions.is_empty() {
            return Err(CompileError::MalformedGraph(
                "a choice node needs at least one condition".to_string(),
            ));
        }
        let id = id.into();
        let slots = conditions.len();
        self.insert_node(
            id.clone(),
            NodeKind::Choice {
                conditions,
                alternatives: Vec::new(),
                alternative_members: Vec::new(),
            },
        )?;
        self.wire_cursor_to(&id)?;
        self.cursor = None;
        self.frames.push(BranchFrame {
            owner: id,
            remaining: slots,
            kind: FrameKind::Choice {
                alternatives: Vec::new(),
                members: Vec::new(),
            },
        });
        Ok(self)
    }

    /// Append a fan-out/fan-in pair and open a branch frame with
    /// `branch_count` slots. Once all branches attach, the cursor sits on
    /// the fan-in.
    pub fn add_fan_out(
        &mut self,
        id: impl Into<String>,
        branch_count: usize,
    ) -> Result<&mut Self, CompileError> {
        if branch_count == 0 {
            return Err(CompileError::MalformedGraph(
                "a fan-out needs at least one branch".to_string(),
            ));
        }
        let id = id.into();
        let fan_in = format!("{id}__join");
        self.insert_node(
            id.clone(),
            NodeKind::FanOut {
                branches: Vec::new(),
                fan_in: fan_in.clone(),
            },
        )?;
        self.insert_node(
            fan_in.clone(),
            NodeKind::FanIn {
                next: END_NODE_ID.to_string(),
            },
        )?;
        self.wire_cursor_to(&id)?;
        self.cursor = None;
        self.frames.push(BranchFrame {
            owner: id,
            remaining: branch_count,
            kind: FrameKind::FanOut {
                fan_in,
                branches: Vec::new(),
            },
        });
        Ok(self)
    }

    /// Whether the innermost branch frame still has unattached slots.
    pub fn has_next_branch(&self) -> bool {
        self.frames.last().is_some_and(|frame| frame.remaining > 0)
    }

    /// Attach the next branch of the innermost frame.
    pub fn next_branch(&mut self, target: BranchTarget) -> Result<&mut Self, CompileError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(CompileError::MalformedGraph(
                "next_branch called with no open branch frame".to_string(),
            ));
        };
        if frame.remaining == 0 {
            return Err(CompileError::MalformedGraph(format!(
                "all branches of '{}' are already attached",
                frame.owner
            )));
        }

        match (&mut frame.kind, target) {
            (
                FrameKind::Choice {
                    alternatives,
                    members,
                },
                BranchTarget::Sub(sub),
            ) => {
                let (head, ids) = merge_sub(&mut self.nodes, sub, END_NODE_ID)?;
                alternatives.push(head);
                members.push(ids);
            }
            (
                FrameKind::Choice {
                    alternatives,
                    members,
                },
                BranchTarget::Shared(index),
            ) => {
                let (head, ids) = match (alternatives.get(index), members.get(index)) {
                    (Some(head), Some(ids)) => (head.clone(), ids.clone()),
                    _ => {
                        return Err(CompileError::MalformedGraph(format!(
                            "shared branch index {index} is not attached yet"
                        )));
                    }
                };
                alternatives.push(head);
                members.push(ids);
            }
            (FrameKind::FanOut { fan_in, branches }, BranchTarget::Sub(sub)) => {
                let join = fan_in.clone();
                let (head, _ids) = merge_sub(&mut self.nodes, sub, &join)?;
                branches.push(head);
            }
            (FrameKind::FanOut { .. }, BranchTarget::Shared(_)) => {
                return Err(CompileError::MalformedGraph(
                    "parallel branches cannot be shared".to_string(),
                ));
            }
        }

        frame.remaining -= 1;
        if frame.remaining == 0 {
            self.close_frame()?;
        }
        Ok(self)
    }

    fn close_frame(&mut self) -> Result<(), CompileError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| CompileError::MalformedGraph("no frame to close".to_string()))?;
        let owner = self
            .nodes
            .get_mut(&frame.owner)
            .ok_or_else(|| CompileError::MalformedGraph(format!("lost node '{}'", frame.owner)))?;

        match frame.kind {
            FrameKind::Choice {
                alternatives,
                members,
            } => {
                let NodeKind::Choice {
                    alternatives: slots,
                    alternative_members,
                    ..
                } = &mut owner.kind
                else {
                    return Err(CompileError::MalformedGraph(format!(
                        "'{}' is not a choice node",
                        frame.owner
                    )));
                };
                *slots = alternatives;
                *alternative_members = members;
                self.cursor = None;
            }
            FrameKind::FanOut { fan_in, branches } => {
                let NodeKind::FanOut {
                    branches: slots, ..
                } = &mut owner.kind
                else {
                    return Err(CompileError::MalformedGraph(format!(
                        "'{}' is not a fan-out node",
                        frame.owner
                    )));
                };
                *slots = branches;
                self.cursor = Some(fan_in);
            }
        }
        Ok(())
    }

    /// Turn this builder into an attachable sub-graph, discarding its
    /// start and end scaffolding.
    pub fn into_sub(mut self) -> Result<SubDag, CompileError> {
        if !self.frames.is_empty() {
            return Err(CompileError::MalformedGraph(
                "sub-graph still has unattached branches".to_string(),
            ));
        }
        let start = self
            .nodes
            .remove(START_NODE_ID)
            .ok_or_else(|| CompileError::MalformedGraph("sub-graph lost its start".to_string()))?;
        self.nodes.remove(END_NODE_ID);
        let NodeKind::Start { next: head } = start.kind else {
            return Err(CompileError::MalformedGraph(
                "start node has the wrong kind".to_string(),
            ));
        };
        Ok(SubDag {
            nodes: self.nodes,
            head,
        })
    }

    /// Validate the graph invariants and emit the DAG.
    pub fn build(self) -> Result<Dag, CompileError> {
        if !self.frames.is_empty() {
            return Err(CompileError::MalformedGraph(
                "unattached branches remain".to_string(),
            ));
        }

        // Every referenced id resolves.
        for node in self.nodes.values() {
            for successor in node.successors() {
                if !self.nodes.contains_key(successor.as_str()) {
                    return Err(CompileError::MalformedGraph(format!(
                        "node '{}' references unknown node '{successor}'",
                        node.id
                    )));
                }
            }
            if let NodeKind::FanOut { fan_in, .. } = &node.kind
                && !self.nodes.contains_key(fan_in.as_str())
            {
                return Err(CompileError::MalformedGraph(format!(
                    "fan-out '{}' references unknown fan-in '{fan_in}'",
                    node.id
                )));
            }
        }

        // Reachability and acyclicity from the start node.
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        self.check_reachable(START_NODE_ID, &mut visited, &mut stack)?;
        for id in self.nodes.keys() {
            if !visited.contains(id.as_str()) {
                return Err(CompileError::MalformedGraph(format!(
                    "node '{id}' is unreachable from the start node"
                )));
            }
        }

        // Reverse index.
        let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in self.nodes.values() {
            for successor in node.successors() {
                let entry = predecessors.entry((*successor).clone()).or_default();
                if !entry.contains(&node.id) {
                    entry.push(node.id.clone());
                }
            }
        }

        // Each fan-out is matched by exactly one fan-in joining all of
        // its branches.
        let mut fan_in_owners: HashMap<&str, &str> = HashMap::new();
        for node in self.nodes.values() {
            if let NodeKind::FanOut { fan_in, .. } = &node.kind {
                if fan_in_owners.insert(fan_in.as_str(), node.id.as_str()).is_some() {
                    return Err(CompileError::MalformedGraph(format!(
                        "fan-in '{fan_in}' is claimed by more than one fan-out"
                    )));
                }
            }
        }
        for node in self.nodes.values() {
            if matches!(node.kind, NodeKind::FanIn { .. }) {
                let Some(owner) = fan_in_owners.get(node.id.as_str()) else {
                    return Err(CompileError::MalformedGraph(format!(
                        "fan-in '{}' has no matching fan-out",
                        node.id
                    )));
                };
                let region = self.fan_out_region(owner, &node.id);
                for pred in predecessors.get(&node.id).map(Vec::as_slice).unwrap_or(&[]) {
                    if pred.as_str() != *owner && !region.contains(pred.as_str()) {
                        return Err(CompileError::MalformedGraph(format!(
                            "node '{pred}' joins fan-in '{}' from outside its region",
                            node.id
                        )));
                    }
                }
            }
        }

        Ok(Dag::new(self.nodes, predecessors))
    }

    /// Node ids reachable from a fan-out's branches without crossing its
    /// fan-in.
    fn fan_out_region<'a>(&'a self, fan_out: &str, fan_in: &str) -> HashSet<&'a str> {
        let mut region = HashSet::new();
        let Some(node) = self.nodes.get(fan_out) else {
            return region;
        };
        let NodeKind::FanOut { branches, .. } = &node.kind else {
            return region;
        };
        let mut pending: Vec<&str> = branches.iter().map(String::as_str).collect();
        while let Some(id) = pending.pop() {
            if id == fan_in || !region.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                pending.extend(node.successors().iter().map(|s| s.as_str()));
            }
        }
        region
    }

    fn check_reachable<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), CompileError> {
        if stack.contains(&id) {
            return Err(CompileError::MalformedGraph(format!(
                "cycle through node '{id}'"
            )));
        }
        if !visited.insert(id) {
            return Ok(());
        }
        stack.push(id);
        if let Some(node) = self.nodes.get(id) {
            for successor in node.successors() {
                self.check_reachable(successor, visited, stack)?;
            }
        }
        stack.pop();
        Ok(())
    }

    fn insert_node(&mut self, id: NodeId, kind: NodeKind) -> Result<(), CompileError> {
        if self.nodes.contains_key(&id) {
            return Err(CompileError::DuplicateState(id));
        }
        self.nodes.insert(
            id.clone(),
            DagNode {
                id,
                branch: self.branch,
                kind,
            },
        );
        Ok(())
    }

    fn wire_cursor_to(&mut self, id: &str) -> Result<(), CompileError> {
        let Some(cursor) = self.cursor.clone() else {
            return Err(CompileError::MalformedGraph(format!(
                "no cursor to wire '{id}' to"
            )));
        };
        let node = self
            .nodes
            .get_mut(&cursor)
            .ok_or_else(|| CompileError::MalformedGraph(format!("lost cursor node '{cursor}'")))?;
        match &mut node.kind {
            NodeKind::Start { next } | NodeKind::Simple { next, .. } | NodeKind::FanIn { next } => {
                *next = id.to_string();
                Ok(())
            }
            _ => Err(CompileError::MalformedGraph(format!(
                "cursor node '{cursor}' has no single out-edge"
            ))),
        }
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge a sub-graph into `nodes`, re-pointing its terminal edges from
/// the sub-graph's end to `terminal`. Returns the head id (after
/// terminal substitution) and the merged node ids.
fn merge_sub(
    nodes: &mut BTreeMap<NodeId, DagNode>,
    sub: SubDag,
    terminal: &str,
) -> Result<(NodeId, Vec<NodeId>), CompileError> {
    let mut ids = Vec::new();
    for (id, mut node) in sub.nodes {
        if nodes.contains_key(&id) {
            return Err(CompileError::DuplicateState(id));
        }
        replace_terminal(&mut node, terminal);
        ids.push(id.clone());
        nodes.insert(id, node);
    }
    let head = if sub.head == END_NODE_ID {
        terminal.to_string()
    } else {
        sub.head
    };
    Ok((head, ids))
}

/// Rewrite every successor reference equal to [`END_NODE_ID`] to `to`.
fn replace_terminal(node: &mut DagNode, to: &str) {
    let rewrite = |target: &mut NodeId| {
        if target == END_NODE_ID {
            *target = to.to_string();
        }
    };
    match &mut node.kind {
        NodeKind::Start { next } | NodeKind::Simple { next, .. } | NodeKind::FanIn { next } => {
            rewrite(next)
        }
        NodeKind::Choice { alternatives, .. } => alternatives.iter_mut().for_each(rewrite),
        NodeKind::FanOut { branches, .. } => branches.iter_mut().for_each(rewrite),
        NodeKind::End => {}
    }
}
