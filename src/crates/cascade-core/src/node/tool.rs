//! Tool and python nodes
//!
//! Both resolve a named capability from the registry at dispatch time and
//! write its result under `state_key`. The `tool` field may itself be a
//! value expression, so a graph can pick the tool from state. Python nodes
//! invoke a registered host-language callable instead of an async tool; the
//! error model is shared.

use super::{eval_variables, single_update, NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::NodeConfig;
use crate::error::{EngineError, Result};
use crate::expr::eval_value_expr;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn compile_tool(name: String, cfg: NodeConfig) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        Box::pin(async move {
            let tool_name = resolve_tool_name(&name, &cfg, &state)?;
            let args = build_args(&cfg, &state)?;

            let result = ctx
                .tools
                .call_tool(&tool_name, args)
                .await
                .map_err(|e| EngineError::node(&name, e.to_string()))?;

            Ok(NodeSignal::Continue(match &cfg.state_key {
                Some(key) => single_update(key, result),
                None => Value::Object(Map::new()),
            }))
        })
    })
}

pub(crate) fn compile_python(name: String, cfg: NodeConfig) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        Box::pin(async move {
            let function_name = resolve_tool_name(&name, &cfg, &state)?;
            let args = build_args(&cfg, &state)?;

            let result = ctx
                .tools
                .call_function(&function_name, args)
                .map_err(|e| EngineError::node(&name, e.to_string()))?;

            Ok(NodeSignal::Continue(match &cfg.state_key {
                Some(key) => single_update(key, result),
                None => Value::Object(Map::new()),
            }))
        })
    })
}

// The tool name may be dynamic: "{state.chosen_tool}" resolves through the
// expression language, anything else is taken literally.
fn resolve_tool_name(node: &str, cfg: &NodeConfig, state: &Value) -> Result<String> {
    let raw = cfg
        .tool
        .as_ref()
        .ok_or_else(|| EngineError::node(node, "no tool configured"))?;

    match eval_value_expr(&Value::String(raw.clone()), state)? {
        Value::String(resolved) => Ok(resolved),
        Value::Null => Err(EngineError::node(
            node,
            format!("dynamic tool name '{}' resolved to null", raw),
        )),
        other => Err(EngineError::node(
            node,
            format!("dynamic tool name resolved to non-string {}", other),
        )),
    }
}

// Static `args` first, then `variables` on top.
fn build_args(cfg: &NodeConfig, state: &Value) -> Result<Value> {
    let mut merged: HashMap<String, Value> = HashMap::new();
    for (key, raw) in &cfg.args {
        merged.insert(key.clone(), eval_value_expr(raw, state)?);
    }
    for (key, value) in eval_variables(&cfg.variables, state)? {
        merged.insert(key, value);
    }

    let mut map = Map::new();
    for (key, value) in merged {
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}
