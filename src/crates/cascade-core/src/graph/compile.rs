//! Graph compilation: from validated config to executable graph
//!
//! Compilation builds adjacency, runs cycle detection, applies the
//! loop-safety default (`skip_if_exists = false` for cycle members unless
//! the author set it), derives the state schema, and turns every node
//! declaration into a closure conforming to the node contract. Subgraph
//! nodes load and compile their child graphs here, with a loading stack
//! rejecting circular composition.

use crate::config::loader::{self, load_data_files, validate};
use crate::config::schema::{
    ExecutionDefaults, NodeConfig, NodeKind, OnError, WorkflowConfig, WorkflowDefaults,
};
use crate::error::{EngineError, Result};
use crate::graph::cycles::cycle_members;
use crate::graph::Graph;
use crate::node::{self, NodeExecutor};
use crate::schema::build_schema;
use crate::state::StateSchema;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A node compiled to its executable form
pub struct CompiledNode {
    pub name: String,
    pub kind: NodeKind,
    pub state_key: Option<String>,
    pub requires: Vec<String>,
    /// Effective skip flag, loop-safety default already applied
    pub skip_if_exists: bool,
    pub on_error: OnError,
    pub max_retries: Option<u32>,
    /// Effective loop limit (per-node override wins over `loop_limits`)
    pub loop_limit: Option<u64>,
    /// Route label → target, for router sources of conditional edges
    pub routes: HashMap<String, String>,
    pub default_route: Option<String>,
    pub executor: NodeExecutor,
    /// Alternate-provider executor for the fallback policy
    pub fallback: Option<NodeExecutor>,
}

/// An executable graph: adjacency, node closures, schema and defaults
pub struct CompiledGraph {
    pub name: String,
    pub nodes: HashMap<String, Arc<CompiledNode>>,
    pub topology: Graph,
    pub schema: Arc<StateSchema>,
    pub defaults: Arc<ExecutionDefaults>,
    pub graph_defaults: Arc<WorkflowDefaults>,
    pub graph_dir: Option<PathBuf>,
    pub cycle_members: HashSet<String>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("topology", &self.topology)
            .field("graph_dir", &self.graph_dir)
            .field("cycle_members", &self.cycle_members)
            .finish()
    }
}

/// Compile a validated config and its loaded data files.
pub fn compile(config: WorkflowConfig, data: HashMap<String, Value>) -> Result<CompiledGraph> {
    let mut stack = Vec::new();
    compile_inner(config, data, &mut stack)
}

/// Load, validate and compile a workflow file in one step.
pub fn compile_file(path: impl AsRef<std::path::Path>) -> Result<CompiledGraph> {
    let config = loader::load(path)?;
    let data = load_data_files(&config)?;
    compile(config, data)
}

pub(crate) fn compile_inner(
    config: WorkflowConfig,
    data: HashMap<String, Value>,
    stack: &mut Vec<PathBuf>,
) -> Result<CompiledGraph> {
    validate(&config)?;

    let topology = Graph::build(config.edges.clone());
    let node_names: Vec<String> = config.nodes.keys().cloned().collect();
    let cycles = cycle_members(&topology, &node_names);

    // Advisory only: the linter surfaces these, compilation proceeds.
    for member in &cycles {
        let has_limit = config.loop_limits.contains_key(member)
            || config
                .nodes
                .get(member)
                .and_then(|n| n.loop_limit_override)
                .is_some();
        if !has_limit {
            warn!(node = %member, "cycle member has no loop limit");
        }
    }

    let schema = Arc::new(build_schema(&config, &data));

    let mut nodes = HashMap::new();
    for (name, cfg) in &config.nodes {
        let compiled = compile_node(name, cfg, &config, &cycles, stack)?;
        nodes.insert(name.clone(), Arc::new(compiled));
    }

    debug!(
        graph = %config.name,
        nodes = nodes.len(),
        cycle_members = cycles.len(),
        "graph compiled"
    );

    Ok(CompiledGraph {
        name: config.name.clone(),
        nodes,
        topology,
        schema,
        defaults: Arc::new(config.config.clone()),
        graph_defaults: Arc::new(config.defaults.clone()),
        graph_dir: config.base_dir.clone(),
        cycle_members: cycles,
    })
}

fn compile_node(
    name: &str,
    cfg: &NodeConfig,
    config: &WorkflowConfig,
    cycles: &HashSet<String>,
    stack: &mut Vec<PathBuf>,
) -> Result<CompiledNode> {
    let executor = build_executor(name.to_string(), cfg, config, stack)?;

    // Fallback executors exist only for the LLM family; validation already
    // rejected the policy elsewhere.
    let fallback = match (&cfg.fallback, cfg.kind) {
        (Some(fb), NodeKind::Llm | NodeKind::Router | NodeKind::Agent) => {
            let mut fb_cfg = cfg.clone();
            fb_cfg.provider = fb.provider.clone().or(fb_cfg.provider);
            fb_cfg.model = fb.model.clone().or(fb_cfg.model);
            fb_cfg.max_tokens = fb.max_tokens.or(fb_cfg.max_tokens);
            fb_cfg.fallback = None;
            Some(build_executor(name.to_string(), &fb_cfg, config, stack)?)
        }
        _ => None,
    };

    let in_cycle = cycles.contains(name);
    let skip_if_exists = cfg.skip_if_exists.unwrap_or(!in_cycle);
    if in_cycle && cfg.skip_if_exists.is_none() {
        debug!(node = %name, "cycle member: skip_if_exists defaulted to false");
    }

    Ok(CompiledNode {
        name: name.to_string(),
        kind: cfg.kind,
        state_key: cfg.state_key.clone(),
        requires: cfg.requires.clone(),
        skip_if_exists,
        on_error: cfg.on_error,
        max_retries: cfg.max_retries,
        loop_limit: cfg
            .loop_limit_override
            .or_else(|| config.loop_limits.get(name).copied()),
        routes: cfg.routes.clone(),
        default_route: cfg.default_route.clone(),
        executor,
        fallback,
    })
}

fn build_executor(
    name: String,
    cfg: &NodeConfig,
    config: &WorkflowConfig,
    stack: &mut Vec<PathBuf>,
) -> Result<NodeExecutor> {
    Ok(match cfg.kind {
        NodeKind::Llm => node::llm::compile(name, cfg.clone()),
        NodeKind::Router => node::router::compile(name, cfg.clone()),
        NodeKind::Tool => node::tool::compile_tool(name, cfg.clone()),
        NodeKind::Python => node::tool::compile_python(name, cfg.clone()),
        NodeKind::Passthrough => node::passthrough::compile(name, cfg.clone()),
        NodeKind::Interrupt => node::interrupt::compile(name, cfg.clone()),
        NodeKind::Agent => node::agent::compile(name, cfg.clone()),
        NodeKind::Map => {
            let sub_cfg = cfg.node.as_deref().ok_or_else(|| {
                EngineError::InvalidConfig(format!("nodes.{}.node: required", name))
            })?;
            let sub = build_executor(format!("{}.node", name), sub_cfg, config, stack)?;
            node::map::compile(name, cfg.clone(), sub)
        }
        NodeKind::Subgraph => {
            let child = compile_child_graph(&name, cfg, config, stack)?;
            node::subgraph::compile(name, cfg.clone(), Arc::new(child))
        }
    })
}

fn compile_child_graph(
    name: &str,
    cfg: &NodeConfig,
    config: &WorkflowConfig,
    stack: &mut Vec<PathBuf>,
) -> Result<CompiledGraph> {
    let rel = cfg
        .graph
        .as_ref()
        .ok_or_else(|| EngineError::InvalidConfig(format!("nodes.{}.graph: required", name)))?;
    let path = loader::resolve_path(config, rel);
    let canonical = path
        .canonicalize()
        .map_err(|_| EngineError::MissingFile(path.display().to_string()))?;

    if stack.contains(&canonical) {
        return Err(EngineError::InvalidConfig(format!(
            "nodes.{}.graph: circular subgraph reference through {}",
            name,
            canonical.display()
        )));
    }

    stack.push(canonical);
    let child_config = loader::load(&path)?;
    let child_data = load_data_files(&child_config)?;
    let child = compile_inner(child_config, child_data, stack);
    stack.pop();
    child
}
