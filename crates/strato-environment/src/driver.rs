// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request driver.
//!
//! Drives one composition request to completion: repeatedly asks the
//! progress ledger for the next runnable batch, launches the batch
//! concurrently (container-backed for function nodes, in-process for
//! pure-data transforms), applies the results, and persists the ledger
//! through the cache before computing the next batch. That flush-before-
//! successors ordering is the invariant that makes worker failover safe:
//! any worker holding the composition can pick a request up from the
//! durable store via [`Driver::resume`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use strato_core::cache::ProgressCache;
use strato_core::composition::Composition;
use strato_core::dag::{Dag, NodeKind, WaitSpec, Work};
use strato_core::error::ProgressError;
use strato_core::function::Function;
use strato_core::progress::{NodeStatus, Progress};
use strato_executor::InvocationRequest;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::factory::{ContainerFactory, ContainerOptions};
use crate::invoker::Invoker;

/// Cooperative cancellation flag for a request.
pub type CancelToken = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal state of a driven request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Every node executed or was legitimately skipped.
    Completed,
    /// A node failed; downstream nodes were skipped.
    Failed {
        /// What brought the request down.
        error: String,
    },
    /// The request was cancelled externally.
    Cancelled,
}

/// Result of driving a request.
#[derive(Debug)]
pub struct RequestOutcome {
    /// The request id progress was tracked under.
    pub request_id: String,
    /// Terminal state.
    pub status: RequestStatus,
    /// Handler result text per executed function node.
    pub outputs: HashMap<String, String>,
}

enum NodeOutcome {
    Done(Option<String>),
    ChoiceTaken(usize),
    Failed(String),
    Cancelled,
}

/// Drives composition requests over a container factory.
pub struct Driver {
    factory: Arc<ContainerFactory>,
    cache: Arc<ProgressCache>,
    invoker: Invoker,
}

impl Driver {
    /// Build a driver over the given factory and progress cache.
    pub fn new(
        factory: Arc<ContainerFactory>,
        cache: Arc<ProgressCache>,
        config: &Config,
    ) -> Result<Self> {
        let invoker = Invoker::new(config.executor_port, config.invoke_timeout)?;
        Ok(Self {
            factory,
            cache,
            invoker,
        })
    }

    /// Run a fresh request for the composition with the given input.
    pub async fn run(
        &self,
        composition: &Composition,
        input: Map<String, Value>,
        cancel: Option<CancelToken>,
    ) -> Result<RequestOutcome> {
        let request_id = Uuid::new_v4().to_string();
        let progress = Progress::init(request_id.clone(), &composition.dag);
        self.cache.save(&progress).await?;
        info!(%request_id, composition = %composition.name, "request admitted");
        self.drive(composition, progress, input, cancel).await
    }

    /// Resume a request from its persisted ledger, e.g. after the worker
    /// that started it died.
    pub async fn resume(
        &self,
        composition: &Composition,
        request_id: &str,
        input: Map<String, Value>,
        cancel: Option<CancelToken>,
    ) -> Result<RequestOutcome> {
        let progress = self
            .cache
            .retrieve(request_id)
            .await?
            .ok_or_else(|| Error::RequestNotFound(request_id.to_string()))?;
        info!(%request_id, composition = %composition.name, "request resumed");
        self.drive(composition, progress, input, cancel).await
    }

    async fn drive(
        &self,
        composition: &Composition,
        mut progress: Progress,
        input: Map<String, Value>,
        cancel: Option<CancelToken>,
    ) -> Result<RequestOutcome> {
        let request_id = progress.request_id.clone();
        let mut outputs = HashMap::new();

        loop {
            if is_cancelled(&cancel) {
                return self.cancel_request(progress).await;
            }

            let batch = match progress.next_nodes() {
                Ok(batch) => batch,
                Err(ProgressError::ExecutionFailed) => {
                    self.cache.save(&progress).await?;
                    return Ok(RequestOutcome {
                        request_id,
                        status: RequestStatus::Failed {
                            error: ProgressError::ExecutionFailed.to_string(),
                        },
                        outputs,
                    });
                }
                Err(err) => return Err(Error::Core(err.into())),
            };

            if batch.is_empty() {
                self.cache.save(&progress).await?;
                if progress.is_completed() {
                    info!(%request_id, "request completed");
                    return Ok(RequestOutcome {
                        request_id,
                        status: RequestStatus::Completed,
                        outputs,
                    });
                }
                return Err(Error::Stalled(request_id));
            }

            debug!(%request_id, batch = ?batch, group = progress.next_group, "launching batch");
            let results = join_all(
                batch
                    .iter()
                    .map(|id| self.execute_node(composition, id, &input, &cancel)),
            )
            .await;

            let mut failure = None;
            let mut resolutions = Vec::new();
            for (node_id, outcome) in batch.into_iter().zip(results) {
                match outcome {
                    NodeOutcome::Done(output) => {
                        progress.complete(&node_id).map_err(strato_core::CoreError::from)?;
                        if let Some(output) = output {
                            outputs.insert(node_id, output);
                        }
                    }
                    NodeOutcome::ChoiceTaken(chosen) => {
                        progress.complete(&node_id).map_err(strato_core::CoreError::from)?;
                        resolutions.push((node_id, chosen));
                    }
                    NodeOutcome::Failed(reason) => {
                        warn!(%request_id, node = %node_id, %reason, "node failed");
                        progress.fail(&node_id).map_err(strato_core::CoreError::from)?;
                        failure.get_or_insert(reason);
                    }
                    NodeOutcome::Cancelled => {
                        // Left pending; the next loop turn skips it.
                    }
                }
            }

            // Dead choice alternatives are pruned before the next batch
            // is computed.
            for (choice_id, chosen) in resolutions {
                let dead = dead_alternatives(&composition.dag, &choice_id, chosen);
                debug!(%request_id, choice = %choice_id, chosen, skipped = ?dead, "choice resolved");
                progress
                    .skip_all(dead)
                    .map_err(strato_core::CoreError::from)?;
            }

            if let Some(error) = failure {
                propagate_failure(&mut progress)?;
                self.cache.save(&progress).await?;
                return Ok(RequestOutcome {
                    request_id,
                    status: RequestStatus::Failed { error },
                    outputs,
                });
            }

            self.cache.save(&progress).await?;
        }
    }

    async fn cancel_request(&self, mut progress: Progress) -> Result<RequestOutcome> {
        let request_id = progress.request_id.clone();
        let unfinished = progress.unfinished();
        progress
            .skip_all(unfinished)
            .map_err(strato_core::CoreError::from)?;
        self.cache.save(&progress).await?;
        info!(%request_id, "request cancelled");
        Ok(RequestOutcome {
            request_id,
            status: RequestStatus::Cancelled,
            outputs: HashMap::new(),
        })
    }

    async fn execute_node(
        &self,
        composition: &Composition,
        node_id: &str,
        input: &Map<String, Value>,
        cancel: &Option<CancelToken>,
    ) -> NodeOutcome {
        let Some(node) = composition.dag.find(node_id) else {
            return NodeOutcome::Failed(format!("node '{node_id}' is not part of the DAG"));
        };

        match &node.kind {
            NodeKind::Simple { work, .. } => match work {
                Work::Function(name) => {
                    let Some(function) = composition.function(name) else {
                        return NodeOutcome::Failed(format!(
                            "function '{name}' is not part of the composition"
                        ));
                    };
                    self.invoke_function(function, input, cancel).await
                }
                Work::Identity { result } => {
                    NodeOutcome::Done(result.as_ref().map(Value::to_string))
                }
                Work::Sleep(spec) => {
                    let duration = match spec {
                        WaitSpec::Seconds(seconds) => Duration::from_secs(*seconds),
                        WaitSpec::Until(instant) => (*instant - chrono::Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO),
                    };
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => NodeOutcome::Done(None),
                        _ = wait_for_cancel(cancel) => NodeOutcome::Cancelled,
                    }
                }
                Work::Abort { error, cause } => {
                    let error = error.as_deref().unwrap_or("composition failed");
                    match cause {
                        Some(cause) => NodeOutcome::Failed(format!("{error}: {cause}")),
                        None => NodeOutcome::Failed(error.to_string()),
                    }
                }
            },
            NodeKind::Choice { conditions, .. } => {
                match conditions.iter().position(|c| c.evaluate(input)) {
                    Some(chosen) => NodeOutcome::ChoiceTaken(chosen),
                    None => NodeOutcome::Failed("no choice alternative matched".to_string()),
                }
            }
            // Structural nodes carry no work.
            NodeKind::Start { .. } | NodeKind::End | NodeKind::FanOut { .. } | NodeKind::FanIn { .. } => {
                NodeOutcome::Done(None)
            }
        }
    }

    /// Provision a sandbox for one function invocation and reclaim it
    /// afterwards. Cancellation kills the container, which drops any
    /// in-flight handler with it.
    async fn invoke_function(
        &self,
        function: &Function,
        input: &Map<String, Value>,
        cancel: &Option<CancelToken>,
    ) -> NodeOutcome {
        let options = ContainerOptions {
            memory_mb: function.memory_mb,
            cpu_quota: function.cpu_quota,
            cmd: Vec::new(),
            env: Vec::new(),
        };
        let container = match self.factory.create(&function.image, &options).await {
            Ok(container) => container,
            Err(err) => return NodeOutcome::Failed(format!("container create: {err}")),
        };

        let outcome = self
            .invoke_in_container(&container, function, input, cancel)
            .await;

        if let Err(err) = self.factory.destroy(&container).await {
            warn!(container_id = %container, error = %err, "container reclaim failed");
        }
        outcome
    }

    async fn invoke_in_container(
        &self,
        container: &str,
        function: &Function,
        input: &Map<String, Value>,
        cancel: &Option<CancelToken>,
    ) -> NodeOutcome {
        if let Err(err) = self.factory.start(container).await {
            return NodeOutcome::Failed(format!("container start: {err}"));
        }
        let host = match self.factory.ip_address(container).await {
            Ok(host) => host,
            Err(err) => return NodeOutcome::Failed(format!("container address: {err}")),
        };

        let request = InvocationRequest {
            handler: function.handler.clone(),
            handler_dir: function.handler_dir.clone(),
            command: function.command.clone(),
            params: Some(Value::Object(input.clone())),
        };

        let invocation = tokio::select! {
            result = self.invoker.invoke(&host, &request) => result,
            _ = wait_for_cancel(cancel) => return NodeOutcome::Cancelled,
        };

        match invocation {
            Ok(result) if result.success => NodeOutcome::Done(Some(result.result)),
            Ok(_) => {
                let (log, _) = self.factory.log(container).await;
                NodeOutcome::Failed(format!(
                    "handler '{}' reported failure: {}",
                    function.name,
                    truncate(&log, 2000)
                ))
            }
            Err(err) => NodeOutcome::Failed(format!("handler invocation: {err}")),
        }
    }
}

/// All nodes of the non-chosen alternatives of a choice, minus the nodes
/// the chosen alternative shares with them.
fn dead_alternatives(dag: &Dag, choice_id: &str, chosen: usize) -> Vec<String> {
    let Some(node) = dag.find(choice_id) else {
        return Vec::new();
    };
    let NodeKind::Choice {
        alternative_members,
        ..
    } = &node.kind
    else {
        return Vec::new();
    };
    let kept = alternative_members.get(chosen).cloned().unwrap_or_default();
    let mut dead = Vec::new();
    for (index, members) in alternative_members.iter().enumerate() {
        if index == chosen {
            continue;
        }
        for member in members {
            if !kept.contains(member) && !dead.contains(member) {
                dead.push(member.clone());
            }
        }
    }
    dead
}

/// A failed fan-in predecessor fails the join; everything else still
/// unfinished is skipped.
fn propagate_failure(progress: &mut Progress) -> Result<()> {
    loop {
        let failed_joins: Vec<String> = progress
            .fan_in_deps
            .iter()
            .filter(|(join, deps)| {
                matches!(
                    progress.info(join).map(|info| info.status),
                    Some(NodeStatus::Pending | NodeStatus::Waiting)
                ) && deps.iter().any(|dep| {
                    progress.info(dep).map(|info| info.status) == Some(NodeStatus::Failed)
                })
            })
            .map(|(join, _)| join.clone())
            .collect();
        if failed_joins.is_empty() {
            break;
        }
        for join in failed_joins {
            progress.fail(&join).map_err(strato_core::CoreError::from)?;
        }
    }
    let unfinished = progress.unfinished();
    progress
        .skip_all(unfinished)
        .map_err(strato_core::CoreError::from)?;
    Ok(())
}

fn is_cancelled(cancel: &Option<CancelToken>) -> bool {
    cancel
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed))
}

async fn wait_for_cancel(cancel: &Option<CancelToken>) {
    match cancel {
        Some(flag) => {
            while !flag.load(Ordering::Relaxed) {
                tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
            }
        }
        None => std::future::pending().await,
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
