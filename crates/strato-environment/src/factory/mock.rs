// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container backend for testing.
//!
//! Records the full lifecycle without touching a container runtime, with
//! injectable create/pull failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use super::{ContainerId, ContainerOptions, FactoryError, NO_LOGS, Result};

/// Recorded state of one mock container.
#[derive(Debug, Clone)]
pub struct MockContainer {
    /// Image the container was created from.
    pub image: String,
    /// Options passed at creation.
    pub options: ContainerOptions,
    /// Whether `start` has been called.
    pub running: bool,
    /// `(dest_path, byte_count)` per copy_to call.
    pub copied: Vec<(String, u64)>,
    /// Log text returned by `log`.
    pub log: String,
}

/// Mock container factory.
#[derive(Default)]
pub struct MockFactory {
    /// Apply the once-per-process image refresh policy.
    pub refresh_images: bool,
    /// Fail every create call.
    pub fail_create: bool,
    /// Fail every pull call.
    pub fail_pull: bool,
    /// Address reported for running containers.
    pub ip: String,

    images: Mutex<HashSet<String>>,
    refreshed: Mutex<HashSet<String>>,
    pulls: Mutex<Vec<String>>,
    containers: Mutex<HashMap<ContainerId, MockContainer>>,
    next_id: AtomicU64,
}

impl MockFactory {
    /// Create a mock factory reporting `127.0.0.1` for containers.
    pub fn new() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            ..Self::default()
        }
    }

    /// A factory that already holds the given images locally.
    pub fn with_images(images: &[&str]) -> Self {
        let factory = Self::new();
        {
            let mut local = factory.images.try_lock().expect("fresh lock");
            for image in images {
                local.insert(image.to_string());
            }
        }
        factory
    }

    /// A factory whose create calls always fail.
    pub fn failing_create(images: &[&str]) -> Self {
        Self {
            fail_create: true,
            ..Self::with_images(images)
        }
    }

    /// Images pulled so far, in order.
    pub async fn pulls(&self) -> Vec<String> {
        self.pulls.lock().await.clone()
    }

    /// Snapshot of a container's recorded state.
    pub async fn container(&self, id: &str) -> Option<MockContainer> {
        self.containers.lock().await.get(id).cloned()
    }

    /// Number of containers currently alive (created, not destroyed).
    pub async fn alive(&self) -> usize {
        self.containers.lock().await.len()
    }

    /// Total number of containers ever created.
    pub fn created_count(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Set the log text of a container.
    pub async fn set_log(&self, id: &str, log: &str) {
        if let Some(container) = self.containers.lock().await.get_mut(id) {
            log.clone_into(&mut container.log);
        }
    }

    /// See [`super::ContainerFactory::create`].
    pub async fn create(&self, image: &str, options: &ContainerOptions) -> Result<ContainerId> {
        if !self.has_image(image).await {
            let _ = self.pull_image(image).await;
        }
        if self.fail_create {
            return Err(FactoryError::Runtime {
                command: "mock create".to_string(),
                stderr: "injected create failure".to_string(),
            });
        }
        if !self.images.lock().await.contains(image) {
            return Err(FactoryError::Runtime {
                command: "mock create".to_string(),
                stderr: format!("image '{image}' not present"),
            });
        }
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().await.insert(
            id.clone(),
            MockContainer {
                image: image.to_string(),
                options: options.clone(),
                running: false,
                copied: Vec::new(),
                log: String::new(),
            },
        );
        Ok(id)
    }

    /// See [`super::ContainerFactory::copy_to`].
    pub async fn copy_to<R>(&self, id: &str, mut content: R, dest_path: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes).await?;
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| FactoryError::UnknownContainer(id.to_string()))?;
        container
            .copied
            .push((dest_path.to_string(), bytes.len() as u64));
        Ok(())
    }

    /// See [`super::ContainerFactory::start`].
    pub async fn start(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| FactoryError::UnknownContainer(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    /// See [`super::ContainerFactory::destroy`].
    pub async fn destroy(&self, id: &str) -> Result<()> {
        self.containers
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| FactoryError::UnknownContainer(id.to_string()))
    }

    /// See [`super::ContainerFactory::has_image`].
    pub async fn has_image(&self, image: &str) -> bool {
        let refreshed = self.refreshed.lock().await;
        if !self.images.lock().await.contains(image) {
            return false;
        }
        if self.refresh_images && !refreshed.contains(image) {
            return false;
        }
        true
    }

    /// See [`super::ContainerFactory::pull_image`].
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        if self.fail_pull {
            return Err(FactoryError::Pull {
                image: image.to_string(),
                reason: "injected pull failure".to_string(),
            });
        }
        self.pulls.lock().await.push(image.to_string());
        self.images.lock().await.insert(image.to_string());
        self.refreshed.lock().await.insert(image.to_string());
        Ok(())
    }

    /// See [`super::ContainerFactory::ip_address`].
    pub async fn ip_address(&self, id: &str) -> Result<String> {
        let containers = self.containers.lock().await;
        containers
            .get(id)
            .map(|_| self.ip.clone())
            .ok_or_else(|| FactoryError::UnknownContainer(id.to_string()))
    }

    /// See [`super::ContainerFactory::memory_mb`].
    pub async fn memory_mb(&self, id: &str) -> Result<i64> {
        let containers = self.containers.lock().await;
        containers
            .get(id)
            .map(|c| c.options.memory_mb)
            .ok_or_else(|| FactoryError::UnknownContainer(id.to_string()))
    }

    /// See [`super::ContainerFactory::log`].
    pub async fn log(&self, id: &str) -> (String, Option<FactoryError>) {
        let containers = self.containers.lock().await;
        match containers.get(id) {
            Some(container) => (container.log.clone(), None),
            None => (
                NO_LOGS.to_string(),
                Some(FactoryError::UnknownContainer(id.to_string())),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_is_recorded() {
        let factory = MockFactory::with_images(&["img:latest"]);
        let options = ContainerOptions {
            memory_mb: 64,
            cpu_quota: 0.5,
            ..ContainerOptions::default()
        };

        let id = factory.create("img:latest", &options).await.unwrap();
        factory.start(&id).await.unwrap();
        factory
            .copy_to(&id, &b"tar bytes"[..], "/srv")
            .await
            .unwrap();

        let container = factory.container(&id).await.unwrap();
        assert!(container.running);
        assert_eq!(container.copied, vec![("/srv".to_string(), 9)]);
        assert_eq!(factory.memory_mb(&id).await.unwrap(), 64);
        assert_eq!(factory.ip_address(&id).await.unwrap(), "127.0.0.1");

        factory.destroy(&id).await.unwrap();
        assert_eq!(factory.alive().await, 0);
        assert!(matches!(
            factory.start(&id).await,
            Err(FactoryError::UnknownContainer(_))
        ));
    }

    #[tokio::test]
    async fn missing_images_are_pulled_on_create() {
        let factory = MockFactory::new();
        let id = factory
            .create("fresh:latest", &ContainerOptions::default())
            .await
            .unwrap();
        assert_eq!(factory.pulls().await, vec!["fresh:latest".to_string()]);
        assert!(factory.container(&id).await.is_some());
    }

    #[tokio::test]
    async fn refresh_policy_forces_one_repull() {
        let factory = MockFactory {
            refresh_images: true,
            ..MockFactory::with_images(&["img:latest"])
        };

        // Locally present, but not yet refreshed in this process.
        assert!(!factory.has_image("img:latest").await);
        factory
            .create("img:latest", &ContainerOptions::default())
            .await
            .unwrap();
        assert_eq!(factory.pulls().await, vec!["img:latest".to_string()]);

        // Refreshed once: no further repulls.
        assert!(factory.has_image("img:latest").await);
        factory
            .create("img:latest", &ContainerOptions::default())
            .await
            .unwrap();
        assert_eq!(factory.pulls().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_pull_with_stale_image_still_creates() {
        let factory = MockFactory {
            refresh_images: true,
            fail_pull: true,
            ..MockFactory::with_images(&["img:latest"])
        };
        // The refresh repull fails, but the stale local copy serves.
        let id = factory
            .create("img:latest", &ContainerOptions::default())
            .await
            .unwrap();
        assert!(factory.container(&id).await.is_some());
    }

    #[tokio::test]
    async fn unknown_container_logs_return_the_sentinel() {
        let factory = MockFactory::new();
        let (log, err) = factory.log("missing").await;
        assert_eq!(log, NO_LOGS);
        assert!(err.is_some());
    }
}
