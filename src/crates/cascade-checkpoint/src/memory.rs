//! In-memory checkpoint store
//!
//! Reference implementation of [`CheckpointStore`]: all checkpoints live in a
//! `HashMap` behind a `tokio::sync::RwLock`. Suitable for tests and
//! single-process runs; nothing survives a restart. The `RwLock` write path
//! serializes same-thread writes, satisfying the store contract.

use crate::{
    checkpoint::{Checkpoint, CheckpointMetadata, CheckpointTuple},
    error::Result,
    traits::CheckpointStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CheckpointEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
}

/// In-memory checkpoint store implementation
///
/// Cloning is shallow: clones share the same underlying storage, which lets
/// an engine and a test harness observe the same history.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: Arc<RwLock<HashMap<String, Vec<CheckpointEntry>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Delete all checkpoints (useful for tests)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<CheckpointTuple>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).and_then(|entries| {
            entries.last().map(|entry| {
                CheckpointTuple::new(thread_id, entry.checkpoint.clone(), entry.metadata.clone())
            })
        }))
    }

    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage
            .entry(thread_id.to_string())
            .or_default()
            .push(CheckpointEntry {
                checkpoint,
                metadata,
            });
        Ok(())
    }

    async fn list(
        &self,
        thread_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let storage = self.storage.read().await;

        let thread_ids: Vec<&String> = match thread_id {
            Some(t) => storage.keys().filter(|k| k.as_str() == t).collect(),
            None => storage.keys().collect(),
        };

        let mut results = Vec::new();
        for tid in thread_ids {
            if let Some(entries) = storage.get(tid) {
                for entry in entries.iter().rev() {
                    results.push(CheckpointTuple::new(
                        tid.clone(),
                        entry.checkpoint.clone(),
                        entry.metadata.clone(),
                    ));
                }
            }
        }

        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint(step: u64) -> Checkpoint {
        Checkpoint::new(step, json!({"step": step}), vec!["next".into()])
    }

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let store = InMemoryCheckpointStore::new();
        store
            .put("t1", checkpoint(0), CheckpointMetadata::new())
            .await
            .unwrap();
        store
            .put("t1", checkpoint(1), CheckpointMetadata::new())
            .await
            .unwrap();

        let tuple = store.get("t1").await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.step, 1);
        assert_eq!(tuple.thread_id, "t1");
    }

    #[tokio::test]
    async fn test_get_missing_thread() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_with_limit() {
        let store = InMemoryCheckpointStore::new();
        for step in 0..5 {
            store
                .put("t1", checkpoint(step), CheckpointMetadata::new())
                .await
                .unwrap();
        }

        let listed = store.list(Some("t1"), Some(2)).await.unwrap();
        assert_eq!(listed.len(), 2);
        // Newest first
        assert_eq!(listed[0].checkpoint.step, 4);
        assert_eq!(listed[1].checkpoint.step, 3);
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let store = InMemoryCheckpointStore::new();
        store
            .put("t1", checkpoint(0), CheckpointMetadata::new())
            .await
            .unwrap();
        store.delete("t1").await.unwrap();

        assert!(store.get("t1").await.unwrap().is_none());
        assert_eq!(store.thread_count().await, 0);
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let store = InMemoryCheckpointStore::new();
        store
            .put("a", checkpoint(0), CheckpointMetadata::new())
            .await
            .unwrap();
        store
            .put("b", checkpoint(7), CheckpointMetadata::new())
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap().unwrap().checkpoint.step, 0);
        assert_eq!(store.get("b").await.unwrap().unwrap().checkpoint.step, 7);
        assert_eq!(store.checkpoint_count().await, 2);
    }
}
