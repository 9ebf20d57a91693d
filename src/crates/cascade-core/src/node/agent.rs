//! Agent node: a bounded LLM tool-use loop
//!
//! Each turn renders the node's prompt with the running transcript and the
//! declared tool names. The model either emits a JSON directive
//! `{"tool": "<name>", "args": {...}}` — the tool runs and its result is
//! appended to the transcript — or anything else, which is taken as the
//! final answer and written to `state_key`. Turns are bounded so a confused
//! model cannot spin forever.

use super::{eval_variables, NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::{NodeConfig, OnError};
use crate::error::EngineError;
use crate::prompt::{extract_json, PromptRequest};
use crate::state::TOKEN_USAGE_KEY;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on reason/act turns per agent invocation.
const MAX_AGENT_TURNS: usize = 8;

pub(crate) fn compile(name: String, cfg: NodeConfig) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        Box::pin(async move {
            let base_variables = eval_variables(&cfg.variables, &state)?;
            let mut transcript: Vec<String> = Vec::new();
            let mut usage_total: u64 = 0;

            for turn in 0..MAX_AGENT_TURNS {
                let mut variables = base_variables.clone();
                variables.insert("transcript".to_string(), json!(transcript.join("\n")));
                variables.insert("tools".to_string(), json!(cfg.tools.join(", ")));

                let request = PromptRequest {
                    prompt_name: cfg.prompt.clone().unwrap_or_default(),
                    variables,
                    schema: None,
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
                if let Some(usage) = outcome.usage {
                    usage_total += usage.total();
                }

                let text = match &outcome.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };

                if let Some(directive) = parse_directive(&text, &cfg.tools) {
                    let tool = directive["tool"].as_str().unwrap_or_default().to_string();
                    let args = directive.get("args").cloned().unwrap_or(json!({}));
                    debug!(node = %name, turn, tool = %tool, "agent tool call");

                    transcript.push(format!("assistant: {}", text.trim()));
                    match ctx.tools.call_tool(&tool, args).await {
                        Ok(result) => {
                            transcript.push(format!("tool {}: {}", tool, result));
                        }
                        Err(err) if cfg.on_error == OnError::Skip => {
                            // Let the model see the failure and carry on.
                            transcript.push(format!("tool {}: error: {}", tool, err));
                        }
                        Err(err) => {
                            return Err(EngineError::node(&name, err.to_string()));
                        }
                    }
                    continue;
                }

                // No directive: the turn's output is the final answer.
                let mut updates = Map::new();
                if let Some(state_key) = &cfg.state_key {
                    updates.insert(state_key.clone(), outcome.value);
                }
                if usage_total > 0 {
                    updates.insert(TOKEN_USAGE_KEY.to_string(), usage_total.into());
                }
                return Ok(NodeSignal::Continue(Value::Object(updates)));
            }

            Err(EngineError::node(
                &name,
                format!("agent did not produce an answer within {} turns", MAX_AGENT_TURNS),
            ))
        })
    })
}

// A directive is a JSON object naming one of the declared tools.
fn parse_directive(text: &str, tools: &[String]) -> Option<Value> {
    let value = extract_json(text)?;
    let tool = value.get("tool")?.as_str()?;
    if tools.iter().any(|t| t == tool) {
        Some(value)
    } else {
        None
    }
}
