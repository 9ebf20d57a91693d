//! Key-value checkpoint store
//!
//! Adapter for network key-value backends (Redis-style): only the *last*
//! checkpoint per thread is retained, stored under `{prefix}:{thread_id}`.
//! Payloads go through the JSON serializer, so anything a producer flagged
//! with the callable sentinel survives untouched (see [`crate::serializer`]).
//!
//! The backend itself is a trait so deployments can plug their own client;
//! [`InMemoryKvBackend`] is the test double.

use crate::{
    checkpoint::{Checkpoint, CheckpointMetadata, CheckpointTuple},
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Minimal byte-oriented key-value backend contract
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Keys currently stored under the given prefix.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory [`KvBackend`] used in tests and examples
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvBackend {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Serialize, Deserialize)]
struct KvEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
}

/// Checkpoint store over a [`KvBackend`], last checkpoint only
#[derive(Clone)]
pub struct KvCheckpointStore<B> {
    backend: B,
    prefix: String,
    serializer: JsonSerializer,
}

impl<B: KvBackend> KvCheckpointStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_prefix(backend, "cascade:checkpoint")
    }

    pub fn with_prefix(backend: B, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            serializer: JsonSerializer::new(),
        }
    }

    fn key(&self, thread_id: &str) -> String {
        format!("{}:{}", self.prefix, thread_id)
    }

    fn thread_of(&self, key: &str) -> Option<String> {
        key.strip_prefix(&format!("{}:", self.prefix))
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl<B: KvBackend> CheckpointStore for KvCheckpointStore<B> {
    async fn get(&self, thread_id: &str) -> Result<Option<CheckpointTuple>> {
        match self.backend.get(&self.key(thread_id)).await? {
            Some(bytes) => {
                let entry: KvEntry = self.serializer.loads(&bytes)?;
                Ok(Some(CheckpointTuple::new(
                    thread_id,
                    entry.checkpoint,
                    entry.metadata,
                )))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<()> {
        let entry = KvEntry {
            checkpoint,
            metadata,
        };
        let bytes = self.serializer.dumps(&entry)?;
        self.backend.set(&self.key(thread_id), bytes).await
    }

    async fn list(
        &self,
        thread_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let mut results = Vec::new();

        match thread_id {
            Some(tid) => {
                if let Some(tuple) = self.get(tid).await? {
                    results.push(tuple);
                }
            }
            None => {
                let mut keys = self.backend.keys(&format!("{}:", self.prefix)).await?;
                keys.sort();
                for key in keys {
                    let tid = self.thread_of(&key).ok_or_else(|| {
                        CheckpointError::Storage(format!("foreign key '{}' under prefix", key))
                    })?;
                    if let Some(tuple) = self.get(&tid).await? {
                        results.push(tuple);
                    }
                }
            }
        }

        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.backend.del(&self.key(thread_id)).await
    }
}
