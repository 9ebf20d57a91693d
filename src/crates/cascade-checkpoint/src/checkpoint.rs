//! Core checkpoint data structures
//!
//! A [`Checkpoint`] is a snapshot of a run captured after a superstep: the
//! merged state object, the frontier that superstep produced, and the index
//! of the superstep it closes. A checkpoint written at superstep N is enough
//! to reproduce the frontier for superstep N+1 on resume — the engine never
//! captures a stack.
//!
//! Checkpoints are grouped by `thread_id`: two invocations sharing a thread
//! resume the same state. Subgraph children derive namespaced thread ids
//! from their parent (see [`child_thread_id`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Derive the checkpoint thread id for a subgraph child.
///
/// Namespacing keeps a child's checkpoint history separate from its parent
/// while remaining addressable from the parent thread alone.
pub fn child_thread_id(parent: &str, node: &str) -> String {
    format!("{}:{}", parent, node)
}

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written for the initial input, before any superstep ran
    Input,
    /// Written from inside the superstep loop
    Loop,
    /// Written while the run is suspended on an interrupt
    Interrupt,
}

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source
    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Add custom metadata
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// State snapshot taken after a superstep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version (currently 1)
    pub v: i32,

    /// Unique checkpoint id
    pub id: CheckpointId,

    /// Timestamp of the snapshot
    pub ts: DateTime<Utc>,

    /// Index of the superstep this checkpoint closes (0-based)
    pub step: u64,

    /// The merged state object after the superstep
    pub state: Value,

    /// Node names scheduled for the next superstep
    pub frontier: Vec<String>,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    /// Create a checkpoint for the given superstep
    pub fn new(step: u64, state: Value, frontier: Vec<String>) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            step,
            state,
            frontier,
        }
    }
}

/// A checkpoint together with its thread and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTuple {
    /// Thread the checkpoint belongs to
    pub thread_id: String,

    /// The checkpoint itself
    pub checkpoint: Checkpoint,

    /// Metadata recorded at write time
    pub metadata: CheckpointMetadata,
}

impl CheckpointTuple {
    pub fn new(
        thread_id: impl Into<String>,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint,
            metadata,
        }
    }
}
