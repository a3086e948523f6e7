// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Write-through progress cache.
//!
//! A hot in-memory map fronting the durable store, keyed by request id.
//! Saves write both layers; retrieval consults memory first and
//! repopulates it from the store on a miss. Store failures are logged and
//! retried once; a second failure surfaces to the caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::error::{CoreError, StoreError};
use crate::progress::Progress;
use crate::store::ProgressStore;

/// Cache fronting the durable progress store. A constructed collaborator:
/// build one at startup and thread it through the orchestrator.
pub struct ProgressCache {
    hot: RwLock<HashMap<String, Progress>>,
    store: Arc<dyn ProgressStore>,
}

impl ProgressCache {
    /// Create a cache over the given store backend.
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            hot: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Persist progress to both layers.
    pub async fn save(&self, progress: &Progress) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(progress)?;
        self.put_with_retry(&progress.request_id, bytes).await?;
        self.hot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(progress.request_id.clone(), progress.clone());
        Ok(())
    }

    /// Fetch the progress of a request. `None` when neither layer holds it.
    pub async fn retrieve(&self, request_id: &str) -> Result<Option<Progress>, CoreError> {
        if let Some(progress) = self
            .hot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(request_id)
        {
            return Ok(Some(progress.clone()));
        }

        let Some(bytes) = self.get_with_retry(request_id).await? else {
            return Ok(None);
        };
        let progress: Progress = serde_json::from_slice(&bytes)?;
        self.hot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(request_id.to_string(), progress.clone());
        Ok(Some(progress))
    }

    /// Drop the progress of a finished request from both layers.
    pub async fn delete(&self, request_id: &str) -> Result<(), CoreError> {
        self.hot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(request_id);
        match self.store.delete(request_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(request_id, error = %err, "progress delete failed, retrying once");
                self.store.delete(request_id).await.map_err(CoreError::from)
            }
        }
    }

    async fn put_with_retry(&self, request_id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        match self.store.put(request_id, bytes.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(request_id, error = %err, "progress write failed, retrying once");
                self.store.put(request_id, bytes).await
            }
        }
    }

    async fn get_with_retry(&self, request_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.store.get(request_id).await {
            Ok(found) => Ok(found),
            Err(err) => {
                warn!(request_id, error = %err, "progress read failed, retrying once");
                self.store.get(request_id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::dag::DagBuilder;
    use crate::progress::Progress;
    use crate::store::InMemoryStore;

    fn sample_progress(request_id: &str) -> Progress {
        let mut builder = DagBuilder::new();
        builder
            .add_simple("a", crate::dag::Work::Identity { result: None })
            .unwrap();
        Progress::init(request_id, &builder.build().unwrap())
    }

    /// Store that fails the first `failures` calls of each operation.
    struct FlakyStore {
        inner: InMemoryStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn failing_once() -> Self {
            Self {
                inner: InMemoryStore::new(),
                failures: AtomicU32::new(1),
            }
        }

        fn failing(failures: u32) -> Self {
            Self {
                inner: InMemoryStore::new(),
                failures: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<(), StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(StoreError("injected failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ProgressStore for FlakyStore {
        async fn get(&self, request_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.trip()?;
            self.inner.get(request_id).await
        }

        async fn put(&self, request_id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
            self.trip()?;
            self.inner.put(request_id, bytes).await
        }

        async fn delete(&self, request_id: &str) -> Result<(), StoreError> {
            self.trip()?;
            self.inner.delete(request_id).await
        }
    }

    #[tokio::test]
    async fn save_and_retrieve_round_trip() {
        let cache = ProgressCache::new(Arc::new(InMemoryStore::new()));
        let progress = sample_progress("req-1");

        cache.save(&progress).await.unwrap();
        let loaded = cache.retrieve("req-1").await.unwrap().unwrap();
        assert_eq!(loaded, progress);

        cache.delete("req-1").await.unwrap();
        assert!(cache.retrieve("req-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retrieve_populates_memory_from_store() {
        let store = Arc::new(InMemoryStore::new());
        let progress = sample_progress("req-2");
        store
            .put("req-2", serde_json::to_vec(&progress).unwrap())
            .await
            .unwrap();

        // A cache with a cold hot-map still finds the request.
        let cache = ProgressCache::new(store);
        let loaded = cache.retrieve("req-2").await.unwrap().unwrap();
        assert_eq!(loaded, progress);
    }

    #[tokio::test]
    async fn single_store_failure_is_retried() {
        let cache = ProgressCache::new(Arc::new(FlakyStore::failing_once()));
        let progress = sample_progress("req-3");
        cache.save(&progress).await.unwrap();
        assert!(cache.retrieve("req-3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn persistent_store_failure_surfaces() {
        let cache = ProgressCache::new(Arc::new(FlakyStore::failing(10)));
        let progress = sample_progress("req-4");
        assert!(matches!(
            cache.save(&progress).await,
            Err(CoreError::Store(_))
        ));
    }
}
