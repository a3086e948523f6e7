// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the in-container executor.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use strato_executor::{InvocationRequest, InvocationResult};

/// Errors from driving the in-container executor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InvokeError {
    /// The HTTP client could not be constructed.
    #[error("http client: {0}")]
    Client(reqwest::Error),

    /// The container did not answer.
    #[error("executor at {url} unreachable: {source}")]
    Unreachable {
        /// The endpoint that failed.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The executor answered with a non-success status.
    #[error("executor rejected the invocation with status {0}")]
    Rejected(u16),

    /// The executor response was not a valid invocation result.
    #[error("unreadable executor response: {0}")]
    Decode(reqwest::Error),
}

/// Client posting invocation orders to sandboxed executors.
pub struct Invoker {
    client: reqwest::Client,
    port: u16,
}

impl Invoker {
    /// Build an invoker for executors listening on `port`, with a
    /// per-invocation timeout.
    pub fn new(port: u16, timeout: Duration) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InvokeError::Client)?;
        Ok(Self { client, port })
    }

    /// Run one handler invocation against the executor at `host`.
    pub async fn invoke(
        &self,
        host: &str,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, InvokeError> {
        let url = format!("http://{host}:{}/invoke", self.port);
        debug!(%url, handler = %request.handler, "invoking handler");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|source| InvokeError::Unreachable {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(InvokeError::Rejected(response.status().as_u16()));
        }
        response.json().await.map_err(InvokeError::Decode)
    }
}
