//! File-backed checkpoint store
//!
//! Persists each thread's checkpoint history as a JSON file under a root
//! directory. Writes go through a temp-file rename so a crashed process
//! never leaves a half-written history. Per-thread write locks serialize
//! same-thread writes while letting different threads proceed concurrently.

use crate::{
    checkpoint::{Checkpoint, CheckpointMetadata, CheckpointTuple},
    error::{CheckpointError, Result},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
}

/// Checkpoint store writing one JSON file per thread
#[derive(Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        // Thread ids may contain path separators (subgraph namespacing);
        // flatten them before touching the filesystem.
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", safe))
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_entries(path: &Path) -> Result<Vec<FileEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read(path)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    fn write_entries(path: &Path, entries: &[FileEntry]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<CheckpointTuple>> {
        let entries = Self::read_entries(&self.thread_path(thread_id))?;
        Ok(entries.last().map(|entry| {
            CheckpointTuple::new(thread_id, entry.checkpoint.clone(), entry.metadata.clone())
        }))
    }

    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<()> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let path = self.thread_path(thread_id);
        let mut entries = Self::read_entries(&path)?;
        entries.push(FileEntry {
            checkpoint,
            metadata,
        });
        Self::write_entries(&path, &entries)
    }

    async fn list(
        &self,
        thread_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let mut results = Vec::new();

        match thread_id {
            Some(tid) => {
                let entries = Self::read_entries(&self.thread_path(tid))?;
                for entry in entries.into_iter().rev() {
                    results.push(CheckpointTuple::new(tid, entry.checkpoint, entry.metadata));
                }
            }
            None => {
                for dirent in std::fs::read_dir(&self.root)? {
                    let path = dirent?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let tid = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .ok_or_else(|| {
                            CheckpointError::Storage(format!("unreadable path {:?}", path))
                        })?
                        .to_string();
                    let entries = Self::read_entries(&path)?;
                    for entry in entries.into_iter().rev() {
                        results.push(CheckpointTuple::new(
                            tid.clone(),
                            entry.checkpoint,
                            entry.metadata,
                        ));
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
        let path = self.thread_path(thread_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
