// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for strato-environment.

use thiserror::Error;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Container runtime operation failed.
    #[error("Factory error: {0}")]
    Factory(#[from] crate::factory::FactoryError),

    /// Handler invocation failed at the transport level.
    #[error("Invoke error: {0}")]
    Invoke(#[from] crate::invoker::InvokeError),

    /// Core (compile/progress/store) operation failed.
    #[error("Core error: {0}")]
    Core(#[from] strato_core::CoreError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No progress exists for the request being resumed.
    #[error("Request not found: {0}")]
    RequestNotFound(String),

    /// The ledger produced an empty batch while work remains.
    #[error("Request '{0}' stalled with unfinished nodes")]
    Stalled(String),
}

/// Result type using the environment [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
