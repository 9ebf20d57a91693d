//! # cascade-core - Declarative Workflow Engine for LLM Pipelines
//!
//! A YAML file describes a directed graph of nodes and edges; this crate
//! compiles that description into an executable dataflow and runs it with
//! checkpointed state, coordinating concurrent LLM calls, tool invocations,
//! and human-in-the-loop pauses.
//!
//! ## The moving parts
//!
//! - **Config** ([`config`]) — the immutable workflow definition: nodes,
//!   ordered edges, tools, checkpointer, execution defaults, loop limits,
//!   data files. Loaded and validated before anything runs.
//! - **State schema** ([`schema`], [`state`]) — the state object is a JSON
//!   mapping with a reducer per key, derived from the node declarations.
//!   Nodes return update objects; the engine merges them through the
//!   reducer table at superstep boundaries.
//! - **Expressions** ([`expr`]) — the small, safe, regex-driven language
//!   used by edge conditions, variable bindings, and passthrough
//!   transforms. No arbitrary code, one arithmetic step, quote-aware
//!   condition splitting.
//! - **Graph compiler** ([`graph`]) — adjacency, Tarjan cycle detection,
//!   loop-safety defaults, per-kind node closures, subgraph composition.
//! - **Execution engine** ([`engine`]) — the Pregel-style superstep
//!   scheduler: frontier computation, eligibility checks, parallel
//!   dispatch, deterministic merge, checkpoint per superstep, conditional
//!   routing, interrupt/resume.
//! - **Node kinds** ([`node`]) — llm, router, tool, python, map,
//!   passthrough, interrupt, subgraph, agent.
//! - **Seams** ([`prompt`], [`llm`], [`tool`]) — the narrow interfaces
//!   through which external collaborators are seen: `PromptExecutor`,
//!   `LlmClient`/`LlmResolver`, `Tool`. Checkpoint stores come from the
//!   `cascade-checkpoint` crate.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use cascade_core::engine::{ExecutionEngine, RunConfig, RunInput};
//! use cascade_core::graph::compile::compile_file;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let graph = compile_file("pipeline.yaml")?;
//!     let engine = ExecutionEngine::new(graph);
//!
//!     let outcome = engine
//!         .invoke(
//!             RunInput::Values(json!({"topic": "rust"})),
//!             &RunConfig::with_thread("session-1"),
//!         )
//!         .await?;
//!
//!     println!("final state: {}", outcome.state());
//!     Ok(())
//! }
//! ```
//!
//! ## Interrupt and resume
//!
//! ```rust,ignore
//! let outcome = engine.invoke(RunInput::Values(input), &run).await?;
//! if let RunOutcome::Interrupted { payload, .. } = &outcome {
//!     let answer = ask_human(payload).await;
//!     let resumed = engine.invoke(RunInput::Resume(answer), &run).await?;
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod graph;
pub mod llm;
pub mod node;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod state;
pub mod tool;
pub mod viz;

pub use config::{NodeConfig, NodeKind, OnError, SubgraphMode, WorkflowConfig};
pub use engine::{ExecutionEngine, RunConfig, RunInput, RunOutcome};
pub use error::{EngineError, Result, RunError};
pub use expr::{eval_condition, eval_value_expr};
pub use graph::{compile, CompiledGraph, CompiledNode, END, START};
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmResolver, LlmResponse, TokenUsage};
pub use node::{NodeContext, NodeExecutor, NodeSignal};
pub use prompt::{extract_json, PromptExecutor, PromptOutcome, PromptRequest, TemplatePromptExecutor};
pub use retry::RetryPolicy;
pub use schema::build_schema;
pub use state::{Reducer, StateSchema};
pub use tool::{FnTool, Tool, ToolError, ToolRegistry};
pub use viz::to_mermaid;
