//! LLM node: resolve variables, run the prompt, write the result
//!
//! Resolves the `variables` expressions against state, executes the named
//! prompt through the [`PromptExecutor`](crate::prompt::PromptExecutor)
//! seam, optionally parses JSON out of the response, and writes the result
//! under `state_key`. Token usage flows into `_token_usage`.

use super::{eval_variables, NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::NodeConfig;
use crate::error::EngineError;
use crate::prompt::{extract_json, PromptRequest};
use crate::state::TOKEN_USAGE_KEY;
use serde_json::{Map, Value};
use std::sync::Arc;

pub(crate) fn compile(name: String, cfg: NodeConfig) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        Box::pin(async move {
            let variables = eval_variables(&cfg.variables, &state)?;

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

            let mut value = outcome.value;
            if cfg.parse_json {
                if let Value::String(raw) = &value {
                    value = extract_json(raw).ok_or_else(|| {
                        EngineError::node(&name, "response did not contain parseable JSON")
                    })?;
                }
            }

            let mut updates = Map::new();
            if let Some(state_key) = &cfg.state_key {
                updates.insert(state_key.clone(), value);
            }
            if let Some(usage) = outcome.usage {
                updates.insert(TOKEN_USAGE_KEY.to_string(), usage.total().into());
            }

            Ok(NodeSignal::Continue(Value::Object(updates)))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::{context_with, ScriptedPrompts};
    use serde_json::json;

    fn llm_config(prompt: &str, state_key: &str) -> NodeConfig {
        NodeConfig {
            kind: crate::config::schema::NodeKind::Llm,
            prompt: Some(prompt.to_string()),
            state_key: Some(state_key.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_writes_state_key_and_usage() {
        let (ctx, _) = context_with(ScriptedPrompts::new().respond("summarize", json!("ok")));

        let executor = compile("a".into(), llm_config("summarize", "summary"));
        let signal = executor(json!({"topic": "x"}), ctx).await.unwrap();

        let NodeSignal::Continue(updates) = signal else {
            panic!("expected continue");
        };
        assert_eq!(updates["summary"], "ok");
        assert_eq!(updates[TOKEN_USAGE_KEY], 10);
    }

    #[tokio::test]
    async fn test_variables_are_evaluated() {
        let (ctx, prompts) = context_with(ScriptedPrompts::new().respond("p", json!("done")));

        let mut cfg = llm_config("p", "out");
        cfg.variables
            .insert("next".to_string(), json!("{state.counter + 1}"));

        let executor = compile("a".into(), cfg);
        executor(json!({"counter": 1}), ctx).await.unwrap();

        let requests = prompts.requests.lock().unwrap();
        assert_eq!(requests[0].variables["next"], json!(2));
    }

    #[tokio::test]
    async fn test_parse_json() {
        let (ctx, _) = context_with(
            ScriptedPrompts::new().respond("p", json!("```json\n{\"score\": 0.9}\n```")),
        );

        let mut cfg = llm_config("p", "critique");
        cfg.parse_json = true;

        let executor = compile("a".into(), cfg);
        let NodeSignal::Continue(updates) = executor(json!({}), ctx).await.unwrap() else {
            panic!("expected continue");
        };
        assert_eq!(updates["critique"]["score"], 0.9);
    }

    #[tokio::test]
    async fn test_parse_json_failure_is_node_error() {
        let (ctx, _) = context_with(ScriptedPrompts::new().respond("p", json!("not json at all")));

        let mut cfg = llm_config("p", "out");
        cfg.parse_json = true;

        let executor = compile("a".into(), cfg);
        let err = executor(json!({}), ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::NodeError { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_prompt_failure_becomes_node_error() {
        // No scripted response for this prompt name.
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let executor = compile("a".into(), llm_config("missing", "out"));
        let err = executor(json!({}), ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::NodeError { .. }));
    }
}
