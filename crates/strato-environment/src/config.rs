// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Environment configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repull every image once per process lifetime before reusing it.
    pub refresh_images: bool,
    /// Port the in-container executor listens on.
    pub executor_port: u16,
    /// Timeout for a single handler invocation.
    pub invoke_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `FACTORY_REFRESH_IMAGES`: repull images once per process (default: false)
    /// - `STRATO_EXECUTOR_PORT`: in-container executor port (default: 8080)
    /// - `STRATO_INVOKE_TIMEOUT_SECS`: handler invocation timeout (default: 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        let executor_port: u16 = std::env::var("STRATO_EXECUTOR_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("STRATO_EXECUTOR_PORT", "must be a valid port number")
            })?;

        let invoke_timeout_secs: u64 = std::env::var("STRATO_INVOKE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("STRATO_INVOKE_TIMEOUT_SECS", "must be a positive integer")
            })?;

        Ok(Self {
            refresh_images: parse_env_bool("FACTORY_REFRESH_IMAGES", false),
            executor_port,
            invoke_timeout: Duration::from_secs(invoke_timeout_secs),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_images: false,
            executor_port: 8080,
            invoke_timeout: Duration::from_secs(300),
        }
    }
}

/// Parse an env var into a bool with a sensible default.
fn parse_env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
