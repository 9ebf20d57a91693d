//! Subgraph node: nested graph execution
//!
//! Two modes. `invoke` constructs child state from `input_mapping`
//! (parent key → child key), runs the child under its own checkpoint thread
//! (namespaced from the parent's), and projects results back via
//! `output_mapping` (child key → parent key). `direct` runs the child over a
//! copy of the parent state and merges the effective difference back, as if
//! the child's nodes were inline.
//!
//! If the child suspends on an interrupt, `interrupt_output_mapping`
//! projects the child's pre-suspend state into the parent before the parent
//! suspends too; resuming the parent forwards the resume value into the
//! child. A depth counter bounded by the recursion limit prevents infinite
//! composition.

use super::{NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::{NodeConfig, SubgraphMode};
use crate::engine::{ExecutionEngine, RunConfig, RunInput, RunOutcome};
use crate::error::EngineError;
use crate::graph::compile::CompiledGraph;
use crate::state::{CURRENT_STEP_KEY, ERRORS_KEY, INTERRUPT_KEY, LOOP_COUNTS_KEY, TOKEN_USAGE_KEY};
use cascade_checkpoint::child_thread_id;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub(crate) fn compile(
    name: String,
    cfg: NodeConfig,
    child: Arc<CompiledGraph>,
) -> NodeExecutor {
    Arc::new(move |state: Value, ctx: NodeContext| {
        let name = name.clone();
        let cfg = cfg.clone();
        let child = child.clone();
        Box::pin(async move {
            let mode = cfg.mode.unwrap_or(SubgraphMode::Invoke);

            let depth = ctx.depth + 1;
            let limit = ctx.exec.recursion_limit;
            if depth > limit {
                return Err(EngineError::RecursionExceeded { limit });
            }

            let engine = ExecutionEngine::from_parts(
                child,
                ctx.tools.clone(),
                ctx.prompts.clone(),
                ctx.store.clone(),
            )
            .with_depth(depth);

            let run = RunConfig {
                thread_id: ctx
                    .thread_id
                    .as_ref()
                    .map(|t| child_thread_id(t, &name)),
                recursion_limit: None,
                timeout: ctx
                    .deadline
                    .map(|d| d.saturating_duration_since(Instant::now())),
            };

            let input = match &ctx.resume {
                Some(value) => RunInput::Resume(value.clone()),
                None => match mode {
                    SubgraphMode::Invoke => {
                        RunInput::Values(project(&cfg.input_mapping, &state))
                    }
                    SubgraphMode::Direct => RunInput::Values(state.clone()),
                },
            };

            debug!(node = %name, mode = ?mode, depth, "entering subgraph");
            let outcome = engine
                .invoke(input, &run)
                .await
                .map_err(|e| EngineError::node(&name, e.error.to_string()))?;

            match outcome {
                RunOutcome::Completed { state: child_state } => {
                    let updates = match mode {
                        SubgraphMode::Invoke => project(&cfg.output_mapping, &child_state),
                        SubgraphMode::Direct => state_diff(&state, &child_state),
                    };
                    Ok(NodeSignal::Continue(updates))
                }
                RunOutcome::Interrupted {
                    state: child_state,
                    payload,
                } => {
                    let updates = match mode {
                        SubgraphMode::Invoke => {
                            project(&cfg.interrupt_output_mapping, &child_state)
                        }
                        SubgraphMode::Direct => state_diff(&state, &child_state),
                    };
                    Ok(NodeSignal::Interrupt { payload, updates })
                }
            }
        })
    })
}

// Build an object by copying `source[from]` to `to` for each mapping entry.
fn project(mapping: &HashMap<String, String>, source: &Value) -> Value {
    let mut out = Map::new();
    for (from, to) in mapping {
        let value = source.get(from).cloned().unwrap_or(Value::Null);
        out.insert(to.clone(), value);
    }
    Value::Object(out)
}

/// The effective update a direct-mode child made to the parent state.
///
/// Bookkeeping keys stay with the child; list fields that grew keep only
/// their new suffix and `_token_usage` keeps only the delta, so the parent's
/// reducers re-apply them without duplication.
fn state_diff(parent: &Value, child: &Value) -> Value {
    let mut out = Map::new();
    let (Some(parent_obj), Some(child_obj)) = (parent.as_object(), child.as_object()) else {
        return Value::Object(out);
    };

    for (key, child_value) in child_obj {
        if key == INTERRUPT_KEY || key == CURRENT_STEP_KEY || key == LOOP_COUNTS_KEY {
            continue;
        }
        let parent_value = parent_obj.get(key);
        if parent_value == Some(child_value) {
            continue;
        }

        if key == ERRORS_KEY {
            if let (Some(Value::Array(old)), Value::Array(new)) = (parent_value, child_value) {
                if new.len() >= old.len() && new[..old.len()] == old[..] {
                    out.insert(key.clone(), Value::Array(new[old.len()..].to_vec()));
                    continue;
                }
            }
        }

        if key == TOKEN_USAGE_KEY {
            let old = parent_value.and_then(Value::as_u64).unwrap_or(0);
            let new = child_value.as_u64().unwrap_or(0);
            out.insert(key.clone(), new.saturating_sub(old).into());
            continue;
        }

        if let (Some(Value::Array(old)), Value::Array(new)) = (parent_value, child_value) {
            // Grown list: hand the reducer just the appended suffix.
            if new.len() > old.len() && new[..old.len()] == old[..] {
                out.insert(key.clone(), Value::Array(new[old.len()..].to_vec()));
                continue;
            }
        }

        out.insert(key.clone(), child_value.clone());
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project() {
        let mut mapping = HashMap::new();
        mapping.insert("summary".to_string(), "report".to_string());
        mapping.insert("missing".to_string(), "gap".to_string());

        let projected = project(&mapping, &json!({"summary": "ok", "other": 1}));
        assert_eq!(projected["report"], "ok");
        assert_eq!(projected["gap"], Value::Null);
        assert!(projected.get("other").is_none());
    }

    #[test]
    fn test_state_diff_changed_and_new_keys() {
        let parent = json!({"a": 1, "b": "same"});
        let child = json!({"a": 2, "b": "same", "c": true});

        let diff = state_diff(&parent, &child);
        assert_eq!(diff, json!({"a": 2, "c": true}));
    }

    #[test]
    fn test_state_diff_errors_suffix() {
        let parent = json!({"errors": [{"node": "x"}]});
        let child = json!({"errors": [{"node": "x"}, {"node": "y"}]});

        let diff = state_diff(&parent, &child);
        assert_eq!(diff["errors"], json!([{"node": "y"}]));
    }

    #[test]
    fn test_state_diff_token_usage_delta() {
        let parent = json!({"_token_usage": 100});
        let child = json!({"_token_usage": 150});

        let diff = state_diff(&parent, &child);
        assert_eq!(diff["_token_usage"], 50);
    }

    #[test]
    fn test_state_diff_skips_bookkeeping() {
        let parent = json!({});
        let child = json!({
            "current_step": "inner",
            "_loop_counts": {"inner": 1},
            "__interrupt__": {"node": "inner"},
            "real": 1,
        });

        let diff = state_diff(&parent, &child);
        assert_eq!(diff, json!({"real": 1}));
    }
}
