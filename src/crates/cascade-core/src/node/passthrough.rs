//! Passthrough node: pure state-to-state transforms
//!
//! Each entry of `output` is a value expression evaluated against the
//! current state; the resulting mapping is the node's update.

use super::{NodeContext, NodeExecutor, NodeSignal};
use crate::config::schema::NodeConfig;
use crate::expr::eval_value_expr;
use serde_json::{Map, Value};
use std::sync::Arc;

pub(crate) fn compile(_name: String, cfg: NodeConfig) -> NodeExecutor {
    Arc::new(move |state: Value, _ctx: NodeContext| {
        let cfg = cfg.clone();
        Box::pin(async move {
            let mut updates = Map::new();
            for (key, raw) in &cfg.output {
                updates.insert(key.clone(), eval_value_expr(raw, &state)?);
            }
            Ok(NodeSignal::Continue(Value::Object(updates)))
        })
    })
}
