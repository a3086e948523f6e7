// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-sandbox executor service.
//!
//! A minimal HTTP service that runs inside every function container. The
//! orchestrator posts an [`InvocationRequest`] to `/invoke`; the service
//! materializes the request parameters on disk, spawns the handler
//! process with the executor environment, and reports the handler's
//! result file back as an [`InvocationResult`].
//!
//! The on-disk protocol seen by handlers:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `RESULT_FILE` | where the handler writes its result text |
//! | `PARAMS_FILE` | JSON-serialized invocation parameters (empty when absent) |
//! | `HANDLER` | handler entry point |
//! | `HANDLER_DIR` | directory the handler lives in |
//!
//! A container built for a custom runtime may omit the request command
//! and provide `CUSTOM_CMD` in its image environment instead.

#![deny(missing_docs)]

use axum::Json;
use axum::http::StatusCode;
use axum::routing::post;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

/// File the handler writes its result text to.
pub const RESULT_FILE: &str = "/tmp/_executor_result.json";

/// File the serialized invocation parameters are written to.
pub const PARAMS_FILE: &str = "/tmp/_executor.params";

/// Invocation order posted by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    /// Handler entry point, exported to the process as `HANDLER`.
    pub handler: String,
    /// Handler directory, exported as `HANDLER_DIR`.
    pub handler_dir: String,
    /// Argv launching the handler; empty falls back to `CUSTOM_CMD`.
    #[serde(default)]
    pub command: Vec<String>,
    /// Parameters serialized to `PARAMS_FILE` before the handler runs.
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outcome reported back to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Whether the handler exited successfully.
    pub success: bool,
    /// Contents of the result file; empty on failure or when the handler
    /// wrote nothing.
    #[serde(default)]
    pub result: String,
}

/// Build the executor router.
pub fn router() -> axum::Router {
    axum::Router::new().route("/invoke", post(invoke))
}

/// `POST /invoke`: run the handler once and report its result.
pub async fn invoke(
    Json(request): Json<InvocationRequest>,
) -> Result<Json<InvocationResult>, (StatusCode, String)> {
    let params_file = write_params(request.params.as_ref()).await?;

    let argv = resolve_argv(&request.command).ok_or_else(|| {
        warn!("invocation carries no command and CUSTOM_CMD is unset");
        (
            StatusCode::BAD_REQUEST,
            "no command given and CUSTOM_CMD is unset".to_string(),
        )
    })?;

    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .env("RESULT_FILE", RESULT_FILE)
        .env("HANDLER", &request.handler)
        .env("HANDLER_DIR", &request.handler_dir)
        .env("PARAMS_FILE", &params_file)
        .output()
        .await;

    let result = match output {
        Ok(output) if output.status.success() => {
            debug!(
                stdout = %String::from_utf8_lossy(&output.stdout),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "handler completed"
            );
            let result = tokio::fs::read_to_string(RESULT_FILE)
                .await
                .unwrap_or_default();
            InvocationResult {
                success: true,
                result,
            }
        }
        Ok(output) => {
            warn!(
                exit = ?output.status.code(),
                stdout = %String::from_utf8_lossy(&output.stdout),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "handler exited with a failure"
            );
            InvocationResult {
                success: false,
                result: String::new(),
            }
        }
        Err(err) => {
            warn!(command = %argv[0], error = %err, "handler failed to spawn");
            InvocationResult {
                success: false,
                result: String::new(),
            }
        }
    };

    Ok(Json(result))
}

/// Serialize the parameters to [`PARAMS_FILE`] with mode 0644. Returns
/// the value exported as `PARAMS_FILE`: the path, or empty when the
/// invocation carries no parameters.
async fn write_params(params: Option<&Value>) -> Result<String, (StatusCode, String)> {
    let Some(params) = params else {
        return Ok(String::new());
    };
    let bytes = serde_json::to_vec(params)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    tokio::fs::write(PARAMS_FILE, &bytes).await.map_err(|err| {
        warn!(path = PARAMS_FILE, error = %err, "could not write parameters");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;

    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(PARAMS_FILE, std::fs::Permissions::from_mode(0o644))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    Ok(PARAMS_FILE.to_string())
}

/// The request argv, or the space-split `CUSTOM_CMD` fallback.
fn resolve_argv(command: &[String]) -> Option<Vec<String>> {
    if !command.is_empty() {
        return Some(command.to_vec());
    }
    let custom = std::env::var("CUSTOM_CMD").ok()?;
    let argv: Vec<String> = custom.split_whitespace().map(String::from).collect();
    if argv.is_empty() { None } else { Some(argv) }
}
