//! Error taxonomy for workflow compilation and execution
//!
//! Every failure mode of the engine maps to one variant of [`EngineError`].
//! Node-level failures are first filtered through the node's `on_error`
//! policy; whatever survives is appended to the `errors` state list, and any
//! kind no policy can absorb aborts the invocation. Callers of the engine
//! receive a [`RunError`]: the typed kind plus the partial state as of the
//! last completed superstep.
//!
//! # Matching errors
//!
//! ```rust
//! use cascade_core::error::EngineError;
//!
//! fn describe(err: &EngineError) -> String {
//!     match err {
//!         EngineError::LoopLimitExceeded { node, limit } => {
//!             format!("node '{}' looped past its limit of {}", node, limit)
//!         }
//!         EngineError::RecursionExceeded { limit } => {
//!             format!("run exceeded {} supersteps", limit)
//!         }
//!         other => format!("{}", other),
//!     }
//! }
//! ```

use serde_json::Value;
use thiserror::Error;

/// Convenience result type using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// All error kinds the compiler and engine can produce
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration failed to load or validate; the run cannot start.
    ///
    /// The message points at the offending field.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An edge, loop limit, or route referenced a nonexistent node
    #[error("Unknown node '{node}' referenced by {referenced_by}")]
    UnknownNode {
        /// Name that failed to resolve
        node: String,
        /// Where the reference came from (edge, loop_limits, routes, ...)
        referenced_by: String,
    },

    /// A `data_files` path resolved outside the config directory
    #[error("Path '{0}' escapes the configuration directory")]
    PathEscape(String),

    /// A referenced file does not exist
    #[error("Missing file: {0}")]
    MissingFile(String),

    /// A node's `requires` key is absent or null at dispatch time
    #[error("Node '{node}' requires state key '{key}' which is missing or null")]
    MissingRequirement {
        /// Node that declared the requirement
        node: String,
        /// State key that was absent
        key: String,
    },

    /// A node was scheduled more times than its loop limit allows
    #[error("Node '{node}' exceeded its loop limit of {limit}")]
    LoopLimitExceeded {
        /// Offending node
        node: String,
        /// Configured limit
        limit: u64,
    },

    /// The total superstep count exceeded the recursion limit
    #[error("Recursion limit of {limit} supersteps exceeded")]
    RecursionExceeded {
        /// Configured limit
        limit: u64,
    },

    /// Node logic raised (LLM call, tool invocation, host function)
    #[error("Node '{node}' failed: {detail}")]
    NodeError {
        /// Node that raised
        node: String,
        /// Underlying error description
        detail: String,
    },

    /// A condition or value expression was invalid at runtime
    #[error("Expression error in '{expression}': {detail}")]
    ExpressionError {
        /// The offending expression text
        expression: String,
        /// What went wrong
        detail: String,
    },

    /// The overall invocation timeout tripped; in-flight tasks were cancelled
    #[error("Execution cancelled after {elapsed_ms}ms (timeout {timeout_ms}ms)")]
    ExecutionCancelled {
        /// Milliseconds elapsed when the deadline fired
        elapsed_ms: u64,
        /// Configured budget in milliseconds
        timeout_ms: u64,
    },

    /// Checkpoint store read/write/serialization failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] cascade_checkpoint::CheckpointError),

    /// An interrupt node was reached with no checkpoint store configured
    #[error("Node '{node}' interrupted but no checkpointer is configured")]
    InterruptWithoutCheckpointer {
        /// The interrupt node
        node: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error while loading configuration
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure while loading configuration, prompts or data files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a node execution error with context
    pub fn node(node: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NodeError {
            node: node.into(),
            detail: detail.into(),
        }
    }

    /// Create an expression error with the offending expression text
    pub fn expression(expression: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ExpressionError {
            expression: expression.into(),
            detail: detail.into(),
        }
    }

    /// Create an unknown-node reference error
    pub fn unknown_node(node: impl Into<String>, referenced_by: impl Into<String>) -> Self {
        Self::UnknownNode {
            node: node.into(),
            referenced_by: referenced_by.into(),
        }
    }

    /// Whether a per-node `on_error` policy may absorb this error.
    ///
    /// Structural and budget errors always abort the run regardless of
    /// policy; only node-level failures are recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NodeError { .. } | Self::MissingRequirement { .. }
        )
    }
}

/// A failed run: the typed error plus the partial state
///
/// The state reflects the last completed superstep; when checkpointing is
/// enabled the matching checkpoint is already persisted.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct RunError {
    /// What aborted the run
    #[source]
    pub error: EngineError,
    /// State as of the last completed superstep
    pub state: Value,
}

impl RunError {
    pub fn new(error: EngineError, state: Value) -> Self {
        Self { error, state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_messages() {
        let err = EngineError::LoopLimitExceeded {
            node: "refine".into(),
            limit: 3,
        };
        assert_eq!(format!("{}", err), "Node 'refine' exceeded its loop limit of 3");

        let err = EngineError::unknown_node("ghost", "edge 'a -> ghost'");
        assert!(format!("{}", err).contains("ghost"));
    }

    #[test]
    fn test_recoverability() {
        assert!(EngineError::node("llm", "boom").is_recoverable());
        assert!(EngineError::MissingRequirement {
            node: "b".into(),
            key: "summary".into()
        }
        .is_recoverable());
        assert!(!EngineError::RecursionExceeded { limit: 50 }.is_recoverable());
        assert!(!EngineError::InvalidConfig("bad".into()).is_recoverable());
    }

    #[test]
    fn test_run_error_preserves_state() {
        let err = RunError::new(
            EngineError::RecursionExceeded { limit: 5 },
            json!({"current_step": "loop"}),
        );
        assert_eq!(err.state["current_step"], "loop");
        assert!(format!("{}", err).contains("Recursion limit"));
    }
}
