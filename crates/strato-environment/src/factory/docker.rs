// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker CLI container backend.
//!
//! Shells out to the `docker` binary via [`tokio::process::Command`].
//! The image-list call is serialized behind a lock because the set of
//! once-refreshed images is read and updated on the same path; create,
//! start, and destroy may run concurrently for distinct containers.

use std::collections::HashSet;
use std::process::Stdio;

use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ContainerId, ContainerOptions, FactoryError, NO_LOGS, Result};

const MIB: i64 = 1_048_576;
const CPU_PERIOD_USEC: f64 = 50_000.0;

/// Docker-backed container factory.
pub struct DockerFactory {
    refresh_images: bool,
    /// Images repulled during this process lifetime. The lock also
    /// serializes the image-list call.
    refreshed: Mutex<HashSet<String>>,
}

impl DockerFactory {
    /// Create a Docker factory.
    pub fn new(refresh_images: bool) -> Self {
        Self {
            refresh_images,
            refreshed: Mutex::new(HashSet::new()),
        }
    }

    async fn run(args: &[String]) -> Result<std::process::Output> {
        let output = Command::new("docker").args(args).output().await?;
        if !output.status.success() {
            return Err(FactoryError::Runtime {
                command: format!("docker {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Create a stopped container for `image` with the given limits.
    pub async fn create(&self, image: &str, options: &ContainerOptions) -> Result<ContainerId> {
        if !self.has_image(image).await {
            if let Err(err) = self.pull_image(image).await {
                // A stale local copy may still serve.
                warn!(image, error = %err, "image pull failed, trying the local copy");
            }
        }

        let mut args: Vec<String> = vec!["create".to_string()];
        if options.memory_mb > 0 {
            args.push("--memory".to_string());
            args.push((options.memory_mb * MIB).to_string());
        }
        if options.cpu_quota > 0.0 {
            args.push("--cpu-period".to_string());
            args.push((CPU_PERIOD_USEC as i64).to_string());
            args.push("--cpu-quota".to_string());
            args.push(((CPU_PERIOD_USEC * options.cpu_quota) as i64).to_string());
        }
        for env in &options.env {
            args.push("--env".to_string());
            args.push(env.clone());
        }
        args.push(image.to_string());
        args.extend(options.cmd.iter().cloned());

        let output = Self::run(&args).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(FactoryError::Parse(
                "docker create returned no container id".to_string(),
            ));
        }
        debug!(container_id = %id, image, "created container");
        Ok(id)
    }

    /// Stream a tar archive to `dest_path` inside the container.
    pub async fn copy_to<R>(&self, id: &str, mut content: R, dest_path: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut child = Command::new("docker")
            .args(["cp", "-", &format!("{id}:{dest_path}")])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            FactoryError::Parse("docker cp did not expose stdin".to_string())
        })?;
        tokio::io::copy(&mut content, &mut stdin).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(FactoryError::Runtime {
                command: format!("docker cp - {id}:{dest_path}"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Start a created container without waiting.
    pub async fn start(&self, id: &str) -> Result<()> {
        Self::run(&["start".to_string(), id.to_string()]).await?;
        Ok(())
    }

    /// Force-remove a container, killing it when running.
    pub async fn destroy(&self, id: &str) -> Result<()> {
        Self::run(&["rm".to_string(), "--force".to_string(), id.to_string()]).await?;
        debug!(container_id = %id, "destroyed container");
        Ok(())
    }

    /// Consult the local image list. The refresh policy makes an image
    /// report absent the first time it is seen per process lifetime.
    pub async fn has_image(&self, image: &str) -> bool {
        let refreshed = self.refreshed.lock().await;
        let output = match Command::new("docker")
            .args(["image", "ls", "--format", "{{.Repository}}:{{.Tag}}"])
            .output()
            .await
        {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "image list failed"
                );
                return false;
            }
            Err(err) => {
                warn!(error = %err, "image list failed");
                return false;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let present = stdout.lines().any(|tag| tag.starts_with(image));
        if !present {
            return false;
        }
        if self.refresh_images && !refreshed.contains(image) {
            // Present, but not repulled yet in this process.
            return false;
        }
        true
    }

    /// Pull an image, draining the pull output before returning so the
    /// image is guaranteed present on success.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image, "pulling image");
        let output = Command::new("docker").args(["pull", image]).output().await?;
        if !output.status.success() {
            return Err(FactoryError::Pull {
                image: image.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        self.refreshed.lock().await.insert(image.to_string());
        info!(image, "pulled image");
        Ok(())
    }

    /// IP address of a running container.
    pub async fn ip_address(&self, id: &str) -> Result<String> {
        let output = Self::run(&[
            "inspect".to_string(),
            "-f".to_string(),
            "{{.NetworkSettings.IPAddress}}".to_string(),
            id.to_string(),
        ])
        .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Configured memory limit in MiB.
    pub async fn memory_mb(&self, id: &str) -> Result<i64> {
        let output = Self::run(&[
            "inspect".to_string(),
            "-f".to_string(),
            "{{.HostConfig.Memory}}".to_string(),
            id.to_string(),
        ])
        .await?;
        let bytes: i64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| FactoryError::Parse("unparsable memory limit".to_string()))?;
        Ok(bytes / MIB)
    }

    /// Combined container logs, or the sentinel plus the error.
    pub async fn log(&self, id: &str) -> (String, Option<FactoryError>) {
        match Command::new("docker").args(["logs", id]).output().await {
            Ok(output) if output.status.success() => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                (text, None)
            }
            Ok(output) => (
                NO_LOGS.to_string(),
                Some(FactoryError::Runtime {
                    command: format!("docker logs {id}"),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                }),
            ),
            Err(err) => (NO_LOGS.to_string(), Some(FactoryError::Io(err))),
        }
    }
}
