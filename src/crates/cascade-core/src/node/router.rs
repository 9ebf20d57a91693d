//! Router node: an LLM call constrained to a route label
//!
//! The prompt runs with a schema forcing `{"route": "<label>"}`; the label
//! lands under `_route` (and optionally the raw classification under
//! `state_key`). The engine matches the label against the node's `routes`
//! map when applying the outgoing conditional edge.

use super::{eval_variables, NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::NodeConfig;
use crate::error::EngineError;
use crate::prompt::PromptRequest;
use crate::state::{ROUTE_KEY, TOKEN_USAGE_KEY};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub(crate) fn compile(name: String, cfg: NodeConfig) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        Box::pin(async move {
            let variables = eval_variables(&cfg.variables, &state)?;

            let schema = json!({
                "type": "object",
                "properties": {"route": {"type": "string"}},
                "required": ["route"],
            });

            let request = PromptRequest {
                prompt_name: cfg.prompt.clone().unwrap_or_default(),
                variables,
                schema: Some(schema),
                provider: cfg
                    .provider
                    .clone()
                    .or_else(|| ctx.graph_defaults.provider.clone()),
                model: cfg.model.clone().or_else(|| ctx.graph_defaults.model.clone()),
                max_tokens: cfg.max_tokens.or(ctx.exec.max_tokens),
                graph_dir: ctx.graph_dir.clone(),
            };

            let outcome = ctx
                .prompts
                .execute(request)
                .await
                .map_err(|e| EngineError::node(&name, e.to_string()))?;

            let label = match &outcome.value {
                Value::Object(obj) => obj.get("route").and_then(Value::as_str),
                Value::String(raw) => Some(raw.trim()),
                _ => None,
            }
            .map(str::to_string)
            .ok_or_else(|| EngineError::node(&name, "router did not produce a route label"))?;

            let mut updates = Map::new();
            updates.insert(ROUTE_KEY.to_string(), Value::String(label));
            if let Some(state_key) = &cfg.state_key {
                updates.insert(state_key.clone(), outcome.value.clone());
            }
            if let Some(usage) = outcome.usage {
                updates.insert(TOKEN_USAGE_KEY.to_string(), usage.total().into());
            }

            Ok(NodeSignal::Continue(Value::Object(updates)))
        })
    })
}
