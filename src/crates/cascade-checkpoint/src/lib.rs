//! # cascade-checkpoint - State Persistence for Workflow Runs
//!
//! Trait-based checkpoint abstractions and reference backends for persisting
//! and restoring workflow execution state. Checkpoints are snapshots taken
//! after each superstep; they carry the merged state and the next frontier,
//! which is all the engine needs to resume a run — including runs suspended
//! on a human-in-the-loop interrupt.
//!
//! ## What lives here
//!
//! - [`CheckpointStore`] — the persistence contract the engine talks to
//! - [`Checkpoint`] / [`CheckpointTuple`] / [`CheckpointMetadata`] — the data
//! - [`InMemoryCheckpointStore`] — reference backend for tests and
//!   single-process runs
//! - [`FileCheckpointStore`] — one JSON file per thread under a directory
//! - [`KvCheckpointStore`] — adapter over a [`KvBackend`] (network key-value
//!   stores); retains the last checkpoint per thread only
//! - [`serializer`] — the byte-level serialization protocol plus the
//!   sentinel marker for values with no serialized form
//!
//! ## Thread model
//!
//! Checkpoints are grouped by `thread_id`. Two invocations sharing a thread
//! resume the same state; a subgraph child runs under a namespaced thread id
//! derived with [`child_thread_id`]. Stores serialize writes per thread;
//! writes for different threads may run concurrently.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cascade_checkpoint::{
//!     Checkpoint, CheckpointMetadata, CheckpointStore, InMemoryCheckpointStore,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryCheckpointStore::new();
//!
//!     let checkpoint = Checkpoint::new(0, json!({"topic": "x"}), vec!["summarize".into()]);
//!     store.put("thread-1", checkpoint, CheckpointMetadata::new()).await?;
//!
//!     if let Some(tuple) = store.get("thread-1").await? {
//!         println!("resume at step {} with frontier {:?}",
//!             tuple.checkpoint.step + 1, tuple.checkpoint.frontier);
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod kv;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    child_thread_id, Checkpoint, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use kv::{InMemoryKvBackend, KvBackend, KvCheckpointStore};
pub use memory::InMemoryCheckpointStore;
pub use serializer::{callable_sentinel, is_callable_sentinel, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
