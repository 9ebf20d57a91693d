//! Configuration loading and validation
//!
//! `load` parses a YAML workflow definition, records the directory it came
//! from (all relative paths resolve against it), and validates the result:
//! per-kind required fields, edge endpoints, route targets, loop-limit keys,
//! checkpointer options, and error-policy legality. `load_data_files` reads
//! the declared data files as structured values, rejecting any path that
//! resolves outside the config directory.

use crate::config::schema::{
    EdgeConfig, NodeConfig, NodeKind, OnError, WorkflowConfig,
};
use crate::error::{EngineError, Result};
use crate::graph::{END, START};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Load and validate a workflow config from a file.
pub fn load(path: impl AsRef<Path>) -> Result<WorkflowConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|_| EngineError::MissingFile(path.display().to_string()))?;

    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = from_str(&raw)?;
    config.base_dir = Some(base_dir);
    validate(&config)?;

    debug!(name = %config.name, nodes = config.nodes.len(), "loaded workflow config");
    Ok(config)
}

/// Parse a workflow config from a YAML string (no base directory).
pub fn from_str(raw: &str) -> Result<WorkflowConfig> {
    Ok(serde_yaml::from_str(raw)?)
}

/// Parse and validate a workflow config from a YAML string.
pub fn load_str(raw: &str) -> Result<WorkflowConfig> {
    let config = from_str(raw)?;
    validate(&config)?;
    Ok(config)
}

/// Validate config shapes, references and per-kind required fields.
pub fn validate(config: &WorkflowConfig) -> Result<()> {
    if config.nodes.is_empty() {
        return Err(EngineError::InvalidConfig(
            "nodes: at least one node is required".into(),
        ));
    }

    for (name, node) in &config.nodes {
        if name.as_str() == START || name.as_str() == END {
            return Err(EngineError::InvalidConfig(format!(
                "nodes.{}: '{}' is a reserved node name",
                name, name
            )));
        }
        validate_node(name, node, config)?;
    }

    for (i, edge) in config.edges.iter().enumerate() {
        validate_edge(i, edge, config)?;
    }

    for name in config.loop_limits.keys() {
        if !config.nodes.contains_key(name) {
            return Err(EngineError::unknown_node(name, "loop_limits"));
        }
    }

    if let Some(checkpointer) = &config.checkpointer {
        match checkpointer.kind.as_str() {
            "memory" => {}
            "file" => {
                if checkpointer.path.is_none() {
                    return Err(EngineError::InvalidConfig(
                        "checkpointer.path: required for the file backend".into(),
                    ));
                }
            }
            other => {
                return Err(EngineError::InvalidConfig(format!(
                    "checkpointer.type: unknown backend '{}'",
                    other
                )));
            }
        }
    }

    Ok(())
}

fn validate_node(name: &str, node: &NodeConfig, config: &WorkflowConfig) -> Result<()> {
    let field = |f: &str| format!("nodes.{}.{}", name, f);

    match node.kind {
        NodeKind::Llm => {
            require(node.prompt.is_some(), &field("prompt"))?;
            require(node.state_key.is_some(), &field("state_key"))?;
        }
        NodeKind::Router => {
            require(node.prompt.is_some(), &field("prompt"))?;
            require(!node.routes.is_empty(), &field("routes"))?;
            for (label, target) in &node.routes {
                if !config.nodes.contains_key(target) && target.as_str() != END {
                    return Err(EngineError::unknown_node(
                        target,
                        format!("nodes.{}.routes.{}", name, label),
                    ));
                }
            }
            if let Some(target) = &node.default_route {
                if !config.nodes.contains_key(target) && target.as_str() != END {
                    return Err(EngineError::unknown_node(
                        target,
                        format!("nodes.{}.default_route", name),
                    ));
                }
            }
        }
        NodeKind::Tool => {
            require(node.tool.is_some(), &field("tool"))?;
            restrict_policy(name, node)?;
            if let Some(tool) = &node.tool {
                if !config.tools.contains_key(tool) {
                    warn!(node = name, tool = %tool, "tool not declared in config; relying on runtime registration");
                }
            }
        }
        NodeKind::Python => {
            require(node.tool.is_some(), &field("tool"))?;
            restrict_policy(name, node)?;
        }
        NodeKind::Map => {
            require(node.over.is_some(), &field("over"))?;
            require(node.collect.is_some(), &field("collect"))?;
            let sub = node.node.as_deref().ok_or_else(|| {
                EngineError::InvalidConfig(format!("{}: required", field("node")))
            })?;
            if sub.kind == NodeKind::Map {
                return Err(EngineError::InvalidConfig(format!(
                    "{}: map sub-nodes cannot themselves be maps",
                    field("node")
                )));
            }
            validate_node(&format!("{}.node", name), sub, config)?;
        }
        NodeKind::Passthrough => {
            require(!node.output.is_empty(), &field("output"))?;
        }
        NodeKind::Interrupt => {
            require(node.resume_key.is_some(), &field("resume_key"))?;
        }
        NodeKind::Subgraph => {
            require(node.graph.is_some(), &field("graph"))?;
            require(node.mode.is_some(), &field("mode"))?;
        }
        NodeKind::Agent => {
            require(node.prompt.is_some(), &field("prompt"))?;
            require(node.state_key.is_some(), &field("state_key"))?;
            require(!node.tools.is_empty(), &field("tools"))?;
        }
    }

    if matches!(node.on_error, OnError::Fallback) && node.fallback.is_none() {
        return Err(EngineError::InvalidConfig(format!(
            "{}: on_error=fallback requires a fallback block",
            field("fallback")
        )));
    }

    Ok(())
}

// retry/fallback are LLM-only policies; tool and python nodes get a hard
// validation error rather than a lint warning.
fn restrict_policy(name: &str, node: &NodeConfig) -> Result<()> {
    match node.on_error {
        OnError::Fail | OnError::Skip => Ok(()),
        OnError::Retry | OnError::Fallback => Err(EngineError::InvalidConfig(format!(
            "nodes.{}.on_error: {} nodes support only fail or skip",
            name,
            node.kind.as_str()
        ))),
    }
}

fn validate_edge(index: usize, edge: &EdgeConfig, config: &WorkflowConfig) -> Result<()> {
    let source = format!("edges[{}]", index);

    if edge.from != START && !config.nodes.contains_key(&edge.from) {
        return Err(EngineError::unknown_node(&edge.from, format!("{}.from", source)));
    }
    if edge.from == END {
        return Err(EngineError::InvalidConfig(format!(
            "{}.from: edges cannot originate from {}",
            source, END
        )));
    }

    for target in edge.to.names() {
        if target == START {
            return Err(EngineError::InvalidConfig(format!(
                "{}.to: edges cannot target {}",
                source, START
            )));
        }
        if target != END && !config.nodes.contains_key(target) {
            return Err(EngineError::unknown_node(target, format!("{}.to", source)));
        }
    }

    Ok(())
}

fn require(present: bool, field: &str) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!("{}: required", field)))
    }
}

/// Load the declared `data_files` as structured values.
///
/// Paths resolve against the config directory and must stay within it after
/// resolution. An empty file normalizes to an empty mapping.
pub fn load_data_files(config: &WorkflowConfig) -> Result<HashMap<String, Value>> {
    let mut out = HashMap::new();
    if config.data_files.is_empty() {
        return Ok(out);
    }

    let base_dir = config
        .base_dir
        .as_deref()
        .ok_or_else(|| {
            EngineError::InvalidConfig(
                "data_files: config has no base directory (loaded from a string?)".into(),
            )
        })?;
    let base_canonical = base_dir.canonicalize()?;

    for (key, rel_path) in &config.data_files {
        let resolved = base_dir.join(rel_path);
        let canonical = resolved
            .canonicalize()
            .map_err(|_| EngineError::MissingFile(resolved.display().to_string()))?;

        if !canonical.starts_with(&base_canonical) {
            return Err(EngineError::PathEscape(rel_path.clone()));
        }

        let raw = std::fs::read_to_string(&canonical)?;
        let value: Value = if raw.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_yaml::from_str(&raw)?
        };

        debug!(key = %key, path = %canonical.display(), "loaded data file");
        out.insert(key.clone(), value);
    }

    Ok(out)
}

/// Resolve a path declared in the config against its base directory.
pub fn resolve_path(config: &WorkflowConfig, rel: &str) -> PathBuf {
    match &config.base_dir {
        Some(base) => base.join(rel),
        None => PathBuf::from(rel),
    }
}
