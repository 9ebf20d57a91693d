//! The [`CheckpointStore`] trait — the persistence contract of the engine
//!
//! The execution engine calls `put` after every superstep and `get` at run
//! start. Implementations must serialize writes per thread; writes for
//! different threads may proceed concurrently.
//!
//! Reference backends live in this crate ([`crate::memory`], [`crate::file`],
//! [`crate::kv`]); production deployments implement the trait over their own
//! storage.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use cascade_checkpoint::{
//!     Checkpoint, CheckpointMetadata, CheckpointStore, CheckpointTuple, Result,
//! };
//! use async_trait::async_trait;
//!
//! struct PostgresCheckpointStore {
//!     pool: sqlx::PgPool,
//! }
//!
//! #[async_trait]
//! impl CheckpointStore for PostgresCheckpointStore {
//!     async fn put(
//!         &self,
//!         thread_id: &str,
//!         checkpoint: Checkpoint,
//!         metadata: CheckpointMetadata,
//!     ) -> Result<()> {
//!         let data = serde_json::to_value(&checkpoint)?;
//!         // INSERT ... ON CONFLICT (thread_id, checkpoint_id) DO UPDATE ...
//!         Ok(())
//!     }
//!
//!     // get / list / delete ...
//! }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointTuple};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence contract for per-thread checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch the latest checkpoint for a thread, if any.
    async fn get(&self, thread_id: &str) -> Result<Option<CheckpointTuple>>;

    /// Persist a checkpoint for a thread.
    ///
    /// Writes for the same thread must be applied in call order.
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<()>;

    /// List stored checkpoints, newest first.
    ///
    /// With `thread_id` the listing is restricted to that thread; `limit`
    /// caps the number of tuples returned.
    async fn list(
        &self,
        thread_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Forget a thread and all of its checkpoints.
    async fn delete(&self, thread_id: &str) -> Result<()>;
}
