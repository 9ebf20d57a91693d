//! Interrupt node: cooperative human-in-the-loop suspension
//!
//! On first entry the node emits an interrupt payload built from `message`
//! and its evaluated `variables`; the engine persists a checkpoint and
//! returns control to the caller. When the run resumes, the engine re-enters
//! the node with the supplied resume value in the context, and the node
//! stores it under `resume_key` as a normal update.

use super::{eval_variables, single_update, NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::NodeConfig;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub(crate) fn compile(name: String, cfg: NodeConfig) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        Box::pin(async move {
            let resume_key = cfg.resume_key.clone().unwrap_or_default();

            if let Some(value) = ctx.resume {
                return Ok(NodeSignal::Continue(single_update(&resume_key, value)));
            }

            let keys = eval_variables(&cfg.variables, &state)?;
            let mut key_map = Map::new();
            for (k, v) in keys {
                key_map.insert(k, v);
            }

            let payload = json!({
                "node": name,
                "message": cfg.message.clone().unwrap_or_default(),
                "resume_key": resume_key,
                "keys": Value::Object(key_map),
            });

            Ok(NodeSignal::Interrupt {
                payload,
                updates: Value::Object(Map::new()),
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::NodeKind;
    use crate::node::testing::{context_with, ScriptedPrompts};

    fn interrupt_config() -> NodeConfig {
        let mut cfg = NodeConfig {
            kind: NodeKind::Interrupt,
            message: Some("pick a color".to_string()),
            resume_key: Some("answer".to_string()),
            ..Default::default()
        };
        cfg.variables
            .insert("options".to_string(), json!("{state.colors}"));
        cfg
    }

    #[tokio::test]
    async fn test_first_entry_interrupts_with_payload() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let executor = compile("ask".into(), interrupt_config());

        let signal = executor(json!({"colors": ["red", "blue"]}), ctx).await.unwrap();
        let NodeSignal::Interrupt { payload, .. } = signal else {
            panic!("expected interrupt");
        };
        assert_eq!(payload["node"], "ask");
        assert_eq!(payload["message"], "pick a color");
        assert_eq!(payload["resume_key"], "answer");
        assert_eq!(payload["keys"]["options"], json!(["red", "blue"]));
    }

    #[tokio::test]
    async fn test_resume_stores_value_under_resume_key() {
        let (mut ctx, _) = context_with(ScriptedPrompts::new());
        ctx.resume = Some(json!("blue"));

        let executor = compile("ask".into(), interrupt_config());
        let NodeSignal::Continue(updates) = executor(json!({}), ctx).await.unwrap() else {
            panic!("expected continue");
        };
        assert_eq!(updates["answer"], "blue");
    }
}
