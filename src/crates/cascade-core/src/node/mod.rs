//! Node contract and per-kind compilation
//!
//! Every node compiles to a closure with the same shape: it receives a
//! snapshot of state plus a [`NodeContext`], and returns a [`NodeSignal`] —
//! `Continue` with an update object, or `Interrupt` with a payload (and any
//! updates to merge before suspension). Errors are the third arm of the
//! contract and travel through `Result`.
//!
//! Kind-specific compile functions live in the submodules; the graph
//! compiler dispatches on the `type` field (a closed set, see
//! [`NodeKind`](crate::config::NodeKind)).

pub mod agent;
pub mod interrupt;
pub mod llm;
pub mod map;
pub mod passthrough;
pub mod router;
pub mod subgraph;
pub mod tool;

use crate::config::schema::{ExecutionDefaults, WorkflowDefaults};
use crate::error::Result;
use crate::prompt::PromptExecutor;
use crate::tool::ToolRegistry;
use cascade_checkpoint::CheckpointStore;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// What a node tells the engine after executing
#[derive(Debug, Clone)]
pub enum NodeSignal {
    /// Merge these updates and keep going
    Continue(Value),
    /// Merge `updates`, then suspend the run with `payload`
    Interrupt { payload: Value, updates: Value },
}

/// Future returned by a compiled node
pub type NodeFuture = BoxFuture<'static, Result<NodeSignal>>;

/// A compiled node closure
pub type NodeExecutor = Arc<dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync>;

/// Runtime context handed to every node execution
#[derive(Clone)]
pub struct NodeContext {
    /// Tool and host-function registry
    pub tools: Arc<ToolRegistry>,
    /// Prompt/LLM seam
    pub prompts: Arc<dyn PromptExecutor>,
    /// Checkpoint store, when the run is persistent
    pub store: Option<Arc<dyn CheckpointStore>>,
    /// Thread id of the current run
    pub thread_id: Option<String>,
    /// Directory of the graph config (prompt and subgraph resolution)
    pub graph_dir: Option<PathBuf>,
    /// Engine-level execution defaults
    pub exec: Arc<ExecutionDefaults>,
    /// Graph-level provider/model defaults
    pub graph_defaults: Arc<WorkflowDefaults>,
    /// Resume value, present only when re-entering an interrupt node
    pub resume: Option<Value>,
    /// Subgraph nesting depth
    pub depth: u64,
    /// Cooperative deadline for the whole invocation
    pub deadline: Option<Instant>,
}

impl NodeContext {
    /// Minimal context for direct executor invocation (tests, tooling).
    pub fn new(prompts: Arc<dyn PromptExecutor>) -> Self {
        Self {
            tools: Arc::new(ToolRegistry::new()),
            prompts,
            store: None,
            thread_id: None,
            graph_dir: None,
            exec: Arc::new(ExecutionDefaults::default()),
            graph_defaults: Arc::new(WorkflowDefaults::default()),
            resume: None,
            depth: 0,
            deadline: None,
        }
    }
}

/// Build a one-entry update object.
pub(crate) fn single_update(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Evaluate a `variables` mapping against state.
pub(crate) fn eval_variables(
    variables: &std::collections::HashMap<String, Value>,
    state: &Value,
) -> Result<std::collections::HashMap<String, Value>> {
    let mut out = std::collections::HashMap::new();
    for (key, raw) in variables {
        out.insert(key.clone(), crate::expr::eval_value_expr(raw, state)?);
    }
    Ok(out)
}

/// Shape of entries appended to the `errors` state list.
pub(crate) fn error_entry(node: &str, detail: impl std::fmt::Display) -> Value {
    serde_json::json!({"node": node, "error": detail.to_string()})
}
