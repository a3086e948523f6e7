// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container factory - sandbox lifecycle backends.
//!
//! The factory is a tagged sum of backends chosen at initialization and
//! threaded through the driver explicitly; there is no process-wide
//! singleton. The Docker backend shells out to the `docker` CLI; the
//! mock backend records lifecycle state for tests.

pub mod docker;
pub mod mock;

pub use docker::DockerFactory;
pub use mock::MockFactory;

use thiserror::Error;
use tokio::io::AsyncRead;

/// Opaque runtime-assigned container identifier.
pub type ContainerId = String;

/// Sentinel returned by [`ContainerFactory::log`] when logs cannot be
/// fetched.
pub const NO_LOGS: &str = "no logs";

/// Resource and launch options for a sandbox.
///
/// `cpu_quota` is a fraction of a core in `(0, 1]`; it maps to a 50ms
/// scheduling period with a proportional quota. `0` leaves the CPU
/// unlimited.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    /// Memory limit in MiB; `0` leaves memory unlimited.
    pub memory_mb: i64,
    /// CPU quota in `(0, 1]` of a core.
    pub cpu_quota: f64,
    /// Command overriding the image entry point; usually empty so the
    /// image's executor entry point runs.
    pub cmd: Vec<String>,
    /// Additional `KEY=VALUE` environment entries.
    pub env: Vec<String>,
}

/// Errors from container runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FactoryError {
    /// Spawning or talking to the runtime CLI failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime CLI reported a failure.
    #[error("'{command}' failed: {stderr}")]
    Runtime {
        /// The command line that failed.
        command: String,
        /// Trimmed standard error of the command.
        stderr: String,
    },

    /// An image pull failed.
    #[error("could not pull image '{image}': {reason}")]
    Pull {
        /// The image that failed to pull.
        image: String,
        /// Why the pull failed.
        reason: String,
    },

    /// Runtime output could not be interpreted.
    #[error("could not parse runtime output: {0}")]
    Parse(String),

    /// No such container.
    #[error("unknown container '{0}'")]
    UnknownContainer(ContainerId),
}

/// Result type for factory operations.
pub type Result<T> = std::result::Result<T, FactoryError>;

/// Container lifecycle backend, chosen at initialization.
pub enum ContainerFactory {
    /// Docker CLI backend.
    Docker(DockerFactory),
    /// Recording backend for tests.
    Mock(MockFactory),
}

impl ContainerFactory {
    /// Create a Docker-backed factory.
    pub fn docker(refresh_images: bool) -> Self {
        Self::Docker(DockerFactory::new(refresh_images))
    }

    /// Create a mock-backed factory.
    pub fn mock(mock: MockFactory) -> Self {
        Self::Mock(mock)
    }

    /// The mock backend, when this factory is mock-backed.
    pub fn as_mock(&self) -> Option<&MockFactory> {
        match self {
            Self::Mock(mock) => Some(mock),
            Self::Docker(_) => None,
        }
    }

    /// Ensure the image is locally present (pulling on a miss; a failed
    /// pull is tolerated when a stale copy exists) and create a stopped
    /// container with the given resource limits.
    pub async fn create(&self, image: &str, options: &ContainerOptions) -> Result<ContainerId> {
        match self {
            Self::Docker(f) => f.create(image, options).await,
            Self::Mock(f) => f.create(image, options).await,
        }
    }

    /// Stream a tar archive into the container filesystem at `dest_path`.
    pub async fn copy_to<R>(&self, id: &str, content: R, dest_path: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        match self {
            Self::Docker(f) => f.copy_to(id, content, dest_path).await,
            Self::Mock(f) => f.copy_to(id, content, dest_path).await,
        }
    }

    /// Start a created container. Does not wait for it to do anything.
    pub async fn start(&self, id: &str) -> Result<()> {
        match self {
            Self::Docker(f) => f.start(id).await,
            Self::Mock(f) => f.start(id).await,
        }
    }

    /// Force-remove a container, killing it first when running.
    pub async fn destroy(&self, id: &str) -> Result<()> {
        match self {
            Self::Docker(f) => f.destroy(id).await,
            Self::Mock(f) => f.destroy(id).await,
        }
    }

    /// Whether the image is usable locally. Under the refresh policy an
    /// image reports absent the first time it is consulted per process
    /// lifetime, forcing one repull.
    pub async fn has_image(&self, image: &str) -> bool {
        match self {
            Self::Docker(f) => f.has_image(image).await,
            Self::Mock(f) => f.has_image(image).await,
        }
    }

    /// Pull an image from the registry, returning only once the pull has
    /// fully drained.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        match self {
            Self::Docker(f) => f.pull_image(image).await,
            Self::Mock(f) => f.pull_image(image).await,
        }
    }

    /// IP address of a running container.
    pub async fn ip_address(&self, id: &str) -> Result<String> {
        match self {
            Self::Docker(f) => f.ip_address(id).await,
            Self::Mock(f) => f.ip_address(id).await,
        }
    }

    /// Configured memory limit of a container, in MiB.
    pub async fn memory_mb(&self, id: &str) -> Result<i64> {
        match self {
            Self::Docker(f) => f.memory_mb(id).await,
            Self::Mock(f) => f.memory_mb(id).await,
        }
    }

    /// Combined stdout/stderr of a container. On failure the first
    /// element is the [`NO_LOGS`] sentinel and the error rides along.
    pub async fn log(&self, id: &str) -> (String, Option<FactoryError>) {
        match self {
            Self::Docker(f) => f.log(id).await,
            Self::Mock(f) => f.log(id).await,
        }
    }
}
