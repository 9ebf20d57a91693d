//! Tool and host-function registry
//!
//! Tools are external capabilities the engine calls by name: `tool` nodes
//! and `agent` loops resolve them from the [`ToolRegistry`] at dispatch
//! time. `python` nodes resolve host-language callables registered on the
//! same registry under a separate namespace.
//!
//! All tool failures are caught and converted through the node's `on_error`
//! policy; a tool implementation never aborts the run directly.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Tool execution result
pub type ToolResult = std::result::Result<Value, ToolError>;

/// Errors surfaced by tool resolution and execution
#[derive(Debug, Error, Clone)]
pub enum ToolError {
    /// Tool not found in the registry
    #[error("Tool '{0}' not found. Available tools: {1}")]
    NotFound(String, String),

    /// Host function not found in the registry
    #[error("Function '{0}' not found. Available functions: {1}")]
    FunctionNotFound(String, String),

    /// Invalid tool arguments
    #[error("Invalid arguments for tool '{tool}': {error}")]
    InvalidArguments { tool: String, error: String },

    /// Tool execution failed
    #[error("Tool '{tool}' execution failed: {error}")]
    ExecutionFailed { tool: String, error: String },
}

/// An externally implemented capability callable by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invoke the tool with a JSON argument object.
    async fn call(&self, args: Value) -> ToolResult;

    /// One-line description shown to agents.
    fn description(&self) -> &str {
        ""
    }
}

/// Host-language callable used by `python` nodes
pub type HostFunction = Arc<dyn Fn(Value) -> ToolResult + Send + Sync>;

type ToolFuture = BoxFuture<'static, ToolResult>;

/// Adapter building a [`Tool`] from an async closure
pub struct FnTool {
    description: String,
    f: Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>,
}

impl FnTool {
    pub fn new<F>(description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> ToolFuture + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    async fn call(&self, args: Value) -> ToolResult {
        (self.f)(args).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Registry of tools and host functions, resolved by name at dispatch time
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    functions: HashMap<String, HostFunction>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under a name; replaces any existing registration.
    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    /// Register a host function for `python` nodes.
    pub fn register_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> ToolResult + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn get_function(&self, name: &str) -> Option<HostFunction> {
        self.functions.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve and invoke a tool.
    pub async fn call_tool(&self, name: &str, args: Value) -> ToolResult {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string(), self.tool_names().join(", ")))?;
        tool.call(args).await
    }

    /// Resolve and invoke a host function.
    pub fn call_function(&self, name: &str, args: Value) -> ToolResult {
        let f = self.get_function(name).ok_or_else(|| {
            let mut names: Vec<String> = self.functions.keys().cloned().collect();
            names.sort();
            ToolError::FunctionNotFound(name.to_string(), names.join(", "))
        })?;
        f(args)
    }
}
