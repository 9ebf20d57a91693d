//! Configuration data model for workflow definitions
//!
//! A workflow is described declaratively in YAML: a mapping of named nodes,
//! an ordered list of edges, optional tool declarations, checkpointer
//! settings, execution defaults, loop limits, and data files. The loader
//! (see [`crate::config::loader`]) parses and validates these shapes; the
//! structs here are plain immutable data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Node kinds the compiler knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Prompt + LLM call, result written to `state_key`
    Llm,
    /// LLM call constrained to a route label, written to `_route`
    Router,
    /// Named tool invocation with arguments from `variables`
    Tool,
    /// Host-language callable registered by name (named via `tool`)
    Python,
    /// Fan-out over a list, one sub-task per element, fan-in into `collect`
    Map,
    /// Evaluates each `output` entry as an expression over current state
    Passthrough,
    /// Suspends the run with a payload; resumes via `resume_key`
    Interrupt,
    /// Nested graph, `direct` or `invoke` mode
    Subgraph,
    /// LLM tool-use loop over the declared `tools`
    Agent,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Llm => "llm",
            NodeKind::Router => "router",
            NodeKind::Tool => "tool",
            NodeKind::Python => "python",
            NodeKind::Map => "map",
            NodeKind::Passthrough => "passthrough",
            NodeKind::Interrupt => "interrupt",
            NodeKind::Subgraph => "subgraph",
            NodeKind::Agent => "agent",
        }
    }
}

/// Per-node error policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Propagate the error and abort the run (default)
    #[default]
    Fail,
    /// Record the error, null the state key, continue downstream
    Skip,
    /// Re-attempt with exponential backoff, then escalate (LLM kinds only)
    Retry,
    /// Invoke the alternate provider configuration (LLM kinds only)
    Fallback,
}

/// Subgraph execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubgraphMode {
    /// Child state constructed via `input_mapping`, child runs its own
    /// supersteps, results projected back via `output_mapping`
    Invoke,
    /// Child compiled against a compatible state schema and run inline
    Direct,
}

/// Alternate provider configuration for the `fallback` policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

/// A single node declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node kind; drives which other fields are meaningful
    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Prompt name for llm/router/agent kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Expression bindings evaluated against state before dispatch
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,

    /// State key the node's result is written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,

    /// State keys that must be non-null for the node to run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    /// Error policy, default `fail`
    #[serde(default)]
    pub on_error: OnError,

    /// Skip the node when `state_key` already holds a non-null value.
    ///
    /// `None` means "not set by the author": the compiler defaults it to
    /// true, or to false for members of a cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_if_exists: Option<bool>,

    /// Retry budget for the `retry` policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Alternate provider for the `fallback` policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackConfig>,

    /// Per-node override of `loop_limits`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_limit_override: Option<u64>,

    /// Per-node token cap, overrides execution defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Parse the LLM response as JSON before writing it
    #[serde(default)]
    pub parse_json: bool,

    /// Provider override (node metadata tier of the selection policy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model override (node metadata tier of the selection policy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    // -- router --
    /// Route label → target node
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub routes: HashMap<String, String>,

    /// Target node when the emitted label matches no route
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_route: Option<String>,

    // -- tool / python --
    /// Tool name (for `python` kind, the registered host-function name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Static arguments merged under the evaluated `variables`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub args: HashMap<String, Value>,

    // -- agent --
    /// Tools the agent loop may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    // -- map --
    /// Expression producing the list to fan out over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over: Option<String>,

    /// State key each element is bound to inside a sub-task
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub item_as: Option<String>,

    /// State key the ordered results are collected into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collect: Option<String>,

    /// Per-node fan-out cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,

    /// Inline sub-node executed per element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<Box<NodeConfig>>,

    // -- subgraph --
    /// Path to the child graph config, relative to this config's directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,

    /// Subgraph execution mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SubgraphMode>,

    /// Parent key → child key projection at child start
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_mapping: HashMap<String, String>,

    /// Child key → parent key projection at child completion
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output_mapping: HashMap<String, String>,

    /// Child key → parent key projection when the child suspends
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub interrupt_output_mapping: HashMap<String, String>,

    // -- interrupt --
    /// Human-readable message included in the interrupt payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// State key the resume value is stored under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_key: Option<String>,

    // -- passthrough --
    /// Output key → expression, evaluated against current state
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output: HashMap<String, Value>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            kind: NodeKind::Passthrough,
            prompt: None,
            variables: HashMap::new(),
            state_key: None,
            requires: Vec::new(),
            on_error: OnError::Fail,
            skip_if_exists: None,
            max_retries: None,
            fallback: None,
            loop_limit_override: None,
            max_tokens: None,
            parse_json: false,
            provider: None,
            model: None,
            routes: HashMap::new(),
            default_route: None,
            tool: None,
            args: HashMap::new(),
            tools: Vec::new(),
            over: None,
            item_as: None,
            collect: None,
            max_items: None,
            node: None,
            graph: None,
            mode: None,
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            interrupt_output_mapping: HashMap::new(),
            message: None,
            resume_key: None,
            output: HashMap::new(),
        }
    }
}

/// Edge target: one node, or several for conditional routing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeTarget {
    One(String),
    Many(Vec<String>),
}

impl EdgeTarget {
    /// All target node names, in declaration order
    pub fn names(&self) -> Vec<&str> {
        match self {
            EdgeTarget::One(name) => vec![name.as_str()],
            EdgeTarget::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, EdgeTarget::Many(_))
    }
}

/// Edge type marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Normal,
    Conditional,
}

/// A single edge declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub from: String,
    pub to: EdgeTarget,

    /// Condition expression; its presence makes the edge conditional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<EdgeType>,
}

impl EdgeConfig {
    /// Conditional when a condition is present or the target is a list
    /// (`type: conditional` is the explicit spelling of the latter).
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some() || self.to.is_many()
    }
}

/// Declaration of an externally implemented tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Static settings handed to the tool implementation at registration
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
}

/// Checkpointer backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointerConfig {
    #[serde(rename = "type")]
    pub kind: String,

    /// Root directory for the `file` backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Engine-level execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    /// Maximum supersteps per run
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u64,

    /// Graph-wide cap on map fan-out
    #[serde(default = "default_max_map_items")]
    pub max_map_items: usize,

    /// Total invocation budget in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Default token cap for LLM calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_recursion_limit() -> u64 {
    50
}

fn default_max_map_items() -> usize {
    100
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            max_map_items: default_max_map_items(),
            timeout_seconds: None,
            max_tokens: None,
        }
    }
}

/// Graph-level resolution defaults (prompt directory, provider tier)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Global prompt directory tried after the graph-relative one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_dir: Option<String>,
}

/// Top-level workflow definition (immutable once loaded)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub name: String,

    pub nodes: HashMap<String, NodeConfig>,

    /// Ordered: edge declaration order drives frontier determinism
    pub edges: Vec<EdgeConfig>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, ToolConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpointer: Option<CheckpointerConfig>,

    #[serde(default)]
    pub config: ExecutionDefaults,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub loop_limits: HashMap<String, u64>,

    /// State key → file path relative to the config directory
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data_files: HashMap<String, String>,

    #[serde(default)]
    pub defaults: WorkflowDefaults,

    /// Directory the config was loaded from; set by the loader, not the file
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: simple
nodes:
  summarize:
    type: llm
    prompt: summarize
    state_key: summary
edges:
  - from: "__start__"
    to: "summarize"
  - from: "summarize"
    to: "__end__"
"#;
        let config: WorkflowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "simple");
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.edges.len(), 2);
        assert_eq!(config.nodes["summarize"].kind, NodeKind::Llm);
        assert_eq!(config.config.recursion_limit, 50);
        assert_eq!(config.config.max_map_items, 100);
    }

    #[test]
    fn test_parse_conditional_edge_with_list() {
        let yaml = r#"
name: routed
nodes:
  classify:
    type: router
    prompt: classify
    routes:
      bug: triage
      feature: plan
    default_route: plan
  triage:
    type: passthrough
    output: {}
  plan:
    type: passthrough
    output: {}
edges:
  - from: "__start__"
    to: "classify"
  - from: "classify"
    to: ["triage", "plan"]
    type: conditional
"#;
        let config: WorkflowConfig = serde_yaml::from_str(yaml).unwrap();
        let edge = &config.edges[1];
        assert!(edge.is_conditional());
        assert_eq!(edge.to.names(), vec!["triage", "plan"]);
        assert_eq!(
            config.nodes["classify"].routes.get("bug"),
            Some(&"triage".to_string())
        );
    }

    #[test]
    fn test_parse_map_node_with_inline_subnode() {
        let yaml = r#"
name: mapped
nodes:
  expand:
    type: map
    over: "{state.items}"
    as: item
    collect: results
    max_items: 10
    node:
      type: llm
      prompt: expand_item
      state_key: expanded
edges:
  - from: "__start__"
    to: "expand"
  - from: "expand"
    to: "__end__"
"#;
        let config: WorkflowConfig = serde_yaml::from_str(yaml).unwrap();
        let map = &config.nodes["expand"];
        assert_eq!(map.kind, NodeKind::Map);
        assert_eq!(map.item_as.as_deref(), Some("item"));
        assert_eq!(map.collect.as_deref(), Some("results"));
        assert_eq!(map.node.as_ref().unwrap().kind, NodeKind::Llm);
    }

    #[test]
    fn test_skip_if_exists_tracks_explicitness() {
        let yaml = r#"
name: explicit
nodes:
  a:
    type: llm
    prompt: p
    state_key: out
    skip_if_exists: true
  b:
    type: llm
    prompt: p
    state_key: out2
edges:
  - from: "__start__"
    to: "a"
"#;
        let config: WorkflowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.nodes["a"].skip_if_exists, Some(true));
        assert_eq!(config.nodes["b"].skip_if_exists, None);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let yaml = r#"
name: bad
nodes:
  a:
    type: quantum
edges: []
"#;
        assert!(serde_yaml::from_str::<WorkflowConfig>(yaml).is_err());
    }

    #[test]
    fn test_on_error_default_is_fail() {
        let yaml = r#"
name: defaults
nodes:
  a:
    type: tool
    tool: fetch
edges: []
"#;
        let config: WorkflowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.nodes["a"].on_error, OnError::Fail);
    }
}
