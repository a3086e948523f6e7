// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable progress store seam.
//!
//! The store is an external collaborator with single-key CRUD semantics;
//! the core assumes nothing beyond single-key atomicity. The in-memory
//! backend serves tests and single-node embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;

/// Key-value store holding serialized progress, keyed by request id.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetch the serialized progress for a request, if present.
    async fn get(&self, request_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write the serialized progress for a request.
    async fn put(&self, request_id: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Remove the progress of a request. Removing an absent key is not
    /// an error.
    async fn delete(&self, request_id: &str) -> Result<(), StoreError>;
}

/// Process-local store backend.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn get(&self, request_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(request_id)
            .cloned())
    }

    async fn put(&self, request_id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(request_id.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, request_id: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(request_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bytes() {
        let store = InMemoryStore::new();
        store.put("req-1", b"payload".to_vec()).await.unwrap();
        assert_eq!(store.get("req-1").await.unwrap(), Some(b"payload".to_vec()));

        store.delete("req-1").await.unwrap();
        assert_eq!(store.get("req-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_absent_key_is_ok() {
        let store = InMemoryStore::new();
        store.delete("never-written").await.unwrap();
    }
}
