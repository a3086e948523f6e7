// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Strato in-sandbox executor binary.
//!
//! Runs as the entry point of every function container image and serves
//! the `/invoke` endpoint the orchestrator drives.

use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strato_executor=info".parse().unwrap()),
        )
        .init();

    let port: u16 = std::env::var("STRATO_EXECUTOR_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("STRATO_EXECUTOR_PORT must be a valid port number"))?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "executor listening");

    axum::serve(listener, strato_executor::router()).await?;
    Ok(())
}
