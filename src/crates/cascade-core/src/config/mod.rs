//! Workflow configuration: data model and loader

pub mod loader;
pub mod schema;

pub use loader::{load, load_data_files, load_str, resolve_path, validate};
pub use schema::{
    CheckpointerConfig, EdgeConfig, EdgeTarget, EdgeType, ExecutionDefaults, FallbackConfig,
    NodeConfig, NodeKind, OnError, SubgraphMode, ToolConfig, WorkflowConfig, WorkflowDefaults,
};
