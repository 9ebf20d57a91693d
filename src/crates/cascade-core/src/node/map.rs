//! Map node: fan-out over a list, ordered fan-in
//!
//! `over` is evaluated into a list; each element spawns a sub-task running
//! the inline sub-node with state augmented by `{as: element, _map_index: i}`.
//! Sub-results land in `collect` as `{**sub_result, _map_index: i}` and the
//! sorted reducer keeps them ordered by index regardless of completion
//! order. The effective fan-out cap is
//! `min(node.max_items, config.max_map_items, 100)`; excess items are
//! truncated with a warning recorded in `errors`.

use super::{error_entry, NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::NodeConfig;
use crate::engine::policy::{run_with_policy, PolicyInputs};
use crate::error::{EngineError, Result};
use crate::expr::eval_value_expr;
use crate::state::{ERRORS_KEY, MAP_INDEX_KEY, TOKEN_USAGE_KEY};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hard ceiling on map fan-out, applied on top of node and graph caps.
pub const MAP_FANOUT_CEILING: usize = 100;

pub(crate) fn compile(name: String, cfg: NodeConfig, sub_executor: NodeExecutor) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        let sub_executor = sub_executor.clone();
        Box::pin(async move {
            let over_raw = Value::String(cfg.over.clone().unwrap_or_default());
            let items = match eval_value_expr(&over_raw, &state)? {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(EngineError::node(
                        &name,
                        format!("'over' evaluated to non-list {}", other),
                    ))
                }
            };

            let collect_key = cfg.collect.clone().unwrap_or_default();
            let item_key = cfg.item_as.clone().unwrap_or_else(|| "item".to_string());
            let sub_cfg = cfg.node.as_deref().cloned().unwrap_or_default();

            let cap = cfg
                .max_items
                .unwrap_or(usize::MAX)
                .min(ctx.exec.max_map_items)
                .min(MAP_FANOUT_CEILING);

            let mut errors = Vec::new();
            let mut items = items;
            if items.len() > cap {
                warn!(node = %name, total = items.len(), cap, "map fan-out truncated");
                errors.push(error_entry(
                    &name,
                    format!("fan-out of {} items truncated to {}", items.len(), cap),
                ));
                items.truncate(cap);
            }

            if items.is_empty() {
                debug!(node = %name, "map over empty list; no sub-tasks");
                let mut updates = Map::new();
                updates.insert(collect_key, json!([]));
                if !errors.is_empty() {
                    updates.insert(ERRORS_KEY.to_string(), Value::Array(errors));
                }
                return Ok(NodeSignal::Continue(Value::Object(updates)));
            }

            let tasks = items.into_iter().enumerate().map(|(index, element)| {
                let mut sub_state = state.clone();
                if let Some(obj) = sub_state.as_object_mut() {
                    obj.insert(item_key.clone(), element);
                    obj.insert(MAP_INDEX_KEY.to_string(), json!(index));
                }

                let sub_executor = sub_executor.clone();
                let sub_cfg = sub_cfg.clone();
                let ctx = ctx.clone();
                let name = name.clone();
                async move {
                    let inputs = PolicyInputs {
                        name: &name,
                        on_error: sub_cfg.on_error,
                        state_key: sub_cfg.state_key.as_deref(),
                        max_retries: sub_cfg.max_retries,
                        executor: &sub_executor,
                        fallback: None,
                    };
                    (index, run_with_policy(inputs, sub_state, ctx).await)
                }
            });

            let results = join_all(tasks).await;

            let mut collected = Vec::new();
            let mut usage_total: u64 = 0;
            for (index, result) in results {
                let signal = result?;
                let updates = match signal {
                    NodeSignal::Continue(updates) => updates,
                    NodeSignal::Interrupt { .. } => {
                        return Err(EngineError::node(
                            &name,
                            "interrupts are not supported inside map sub-tasks",
                        ));
                    }
                };

                collected.push(normalize_item(&name, &sub_cfg, updates, index, &mut errors, &mut usage_total)?);
            }

            collected.sort_by_key(|item| {
                item.get(MAP_INDEX_KEY)
                    .and_then(Value::as_i64)
                    .unwrap_or(i64::MAX)
            });

            let mut updates = Map::new();
            updates.insert(collect_key, Value::Array(collected));
            if !errors.is_empty() {
                updates.insert(ERRORS_KEY.to_string(), Value::Array(errors));
            }
            if usage_total > 0 {
                updates.insert(TOKEN_USAGE_KEY.to_string(), usage_total.into());
            }

            Ok(NodeSignal::Continue(Value::Object(updates)))
        })
    })
}

// Shape a sub-task's update into a collect entry: stamp the index, hoist
// errors and token usage up to the map node's own update.
fn normalize_item(
    map_name: &str,
    sub_cfg: &NodeConfig,
    updates: Value,
    index: usize,
    errors: &mut Vec<Value>,
    usage_total: &mut u64,
) -> Result<Value> {
    let mut obj = match updates {
        Value::Object(obj) => obj,
        other => {
            // Non-dict sub-result: normalize using the sub-node's state key.
            let key = sub_cfg
                .state_key
                .clone()
                .ok_or_else(|| {
                    EngineError::node(map_name, "sub-node returned a bare value with no state_key")
                })?;
            let mut map = Map::new();
            map.insert(key, other);
            map
        }
    };

    if let Some(Value::Array(sub_errors)) = obj.remove(ERRORS_KEY) {
        errors.extend(sub_errors);
    }
    if let Some(usage) = obj.remove(TOKEN_USAGE_KEY).and_then(|v| v.as_u64()) {
        *usage_total += usage;
    }

    obj.insert(MAP_INDEX_KEY.to_string(), json!(index));
    Ok(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{NodeKind, OnError};
    use crate::node::testing::{context_with, ScriptedPrompts};

    fn map_config(over: &str) -> NodeConfig {
        NodeConfig {
            kind: NodeKind::Map,
            over: Some(over.to_string()),
            item_as: Some("element".to_string()),
            collect: Some("results".to_string()),
            node: Some(Box::new(NodeConfig {
                kind: NodeKind::Passthrough,
                state_key: Some("val".to_string()),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    // Sub-executor multiplying the element's `i` field by ten.
    fn times_ten() -> NodeExecutor {
        Arc::new(|state: Value, _ctx| {
            Box::pin(async move {
                let i = state["element"]["i"].as_i64().unwrap_or(0);
                Ok(NodeSignal::Continue(json!({"val": i * 10})))
            })
        })
    }

    #[tokio::test]
    async fn test_fan_out_and_ordered_fan_in() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let executor = compile("expand".into(), map_config("{state.items}"), times_ten());

        let state = json!({"items": [{"i": 0}, {"i": 1}, {"i": 2}]});
        let NodeSignal::Continue(updates) = executor(state, ctx).await.unwrap() else {
            panic!("expected continue");
        };

        assert_eq!(
            updates["results"],
            json!([
                {"val": 0, "_map_index": 0},
                {"val": 10, "_map_index": 1},
                {"val": 20, "_map_index": 2},
            ])
        );
    }

    #[tokio::test]
    async fn test_empty_list_completes_with_empty_collect() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let executor = compile("expand".into(), map_config("{state.items}"), times_ten());

        let NodeSignal::Continue(updates) =
            executor(json!({"items": []}), ctx).await.unwrap()
        else {
            panic!("expected continue");
        };
        assert_eq!(updates["results"], json!([]));
        assert!(updates.get(ERRORS_KEY).is_none());
    }

    #[tokio::test]
    async fn test_missing_over_treated_as_empty() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let executor = compile("expand".into(), map_config("{state.absent}"), times_ten());

        let NodeSignal::Continue(updates) = executor(json!({}), ctx).await.unwrap() else {
            panic!("expected continue");
        };
        assert_eq!(updates["results"], json!([]));
    }

    #[tokio::test]
    async fn test_truncation_warns_in_errors() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let mut cfg = map_config("{state.items}");
        cfg.max_items = Some(2);

        let executor = compile("expand".into(), cfg, times_ten());
        let state = json!({"items": [{"i": 0}, {"i": 1}, {"i": 2}, {"i": 3}]});
        let NodeSignal::Continue(updates) = executor(state, ctx).await.unwrap() else {
            panic!("expected continue");
        };

        assert_eq!(updates["results"].as_array().unwrap().len(), 2);
        assert!(updates[ERRORS_KEY][0]["error"]
            .as_str()
            .unwrap()
            .contains("truncated"));
    }

    #[tokio::test]
    async fn test_sub_failure_with_skip_policy_is_hoisted() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let mut cfg = map_config("{state.items}");
        if let Some(sub) = cfg.node.as_mut() {
            sub.on_error = OnError::Skip;
        }

        let failing: NodeExecutor = Arc::new(|state: Value, _ctx| {
            Box::pin(async move {
                let i = state["element"]["i"].as_i64().unwrap_or(0);
                if i == 1 {
                    Err(EngineError::node("expand", "boom"))
                } else {
                    Ok(NodeSignal::Continue(json!({"val": i * 10})))
                }
            })
        });

        let executor = compile("expand".into(), cfg, failing);
        let state = json!({"items": [{"i": 0}, {"i": 1}, {"i": 2}]});
        let NodeSignal::Continue(updates) = executor(state, ctx).await.unwrap() else {
            panic!("expected continue");
        };

        // Errors hoisted out of the item and into the map update.
        assert_eq!(updates[ERRORS_KEY].as_array().unwrap().len(), 1);
        let results = updates["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[1]["val"].is_null());
    }

    #[tokio::test]
    async fn test_sub_failure_with_fail_policy_propagates() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let failing: NodeExecutor = Arc::new(|_state, _ctx| {
            Box::pin(async move { Err(EngineError::node("expand", "boom")) })
        });

        let executor = compile("expand".into(), map_config("{state.items}"), failing);
        let err = executor(json!({"items": [{"i": 0}]}), ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::NodeError { .. }));
    }

    #[tokio::test]
    async fn test_usage_is_hoisted_and_summed() {
        let (ctx, _) = context_with(ScriptedPrompts::new());
        let with_usage: NodeExecutor = Arc::new(|_state, _ctx| {
            Box::pin(async move {
                Ok(NodeSignal::Continue(json!({"val": 1, "_token_usage": 5})))
            })
        });

        let executor = compile("expand".into(), map_config("{state.items}"), with_usage);
        let NodeSignal::Continue(updates) = executor(json!({"items": [1, 2]}), ctx)
            .await
            .unwrap()
        else {
            panic!("expected continue");
        };
        assert_eq!(updates[TOKEN_USAGE_KEY], 10);
        assert!(updates["results"][0].get(TOKEN_USAGE_KEY).is_none());
    }
}
