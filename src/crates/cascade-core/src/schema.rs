//! State schema builder
//!
//! Derives the runtime [`StateSchema`] from a workflow config: every key a
//! node declares it will write gets a field with a matching reducer,
//! unioned with the fixed system fields. `data_files` keys become unreduced
//! fields seeded with their loaded contents.

use crate::config::schema::{NodeConfig, NodeKind, WorkflowConfig};
use crate::state::{
    DictMergeReducer, LastValueReducer, ListConcatReducer, NumericAddReducer, SortedAddReducer,
    StateSchema, CURRENT_STEP_KEY, ERRORS_KEY, INTERRUPT_KEY, LOOP_COUNTS_KEY, ROUTE_KEY,
    TOKEN_USAGE_KEY,
};
use serde_json::Value;
use std::collections::HashMap;

/// Build the state schema for a workflow.
///
/// `data` holds the loaded `data_files` contents keyed by their declared
/// state key (see [`crate::config::loader::load_data_files`]).
pub fn build_schema(config: &WorkflowConfig, data: &HashMap<String, Value>) -> StateSchema {
    let mut schema = StateSchema::new();

    // Fixed system fields
    schema.add_field(ERRORS_KEY, Box::new(ListConcatReducer));
    schema.add_field(CURRENT_STEP_KEY, Box::new(LastValueReducer));
    schema.add_field(LOOP_COUNTS_KEY, Box::new(DictMergeReducer));
    schema.add_field(TOKEN_USAGE_KEY, Box::new(NumericAddReducer));
    schema.add_field(INTERRUPT_KEY, Box::new(LastValueReducer));
    schema.add_field(ROUTE_KEY, Box::new(LastValueReducer));

    for node in config.nodes.values() {
        collect_node_fields(node, &mut schema);
    }

    for (key, value) in data {
        schema.seed(key.clone(), value.clone());
    }

    schema
}

fn collect_node_fields(node: &NodeConfig, schema: &mut StateSchema) {
    if let Some(state_key) = &node.state_key {
        schema.add_field(state_key.clone(), Box::new(LastValueReducer));
    }

    match node.kind {
        NodeKind::Map => {
            if let Some(collect) = &node.collect {
                schema.add_field(collect.clone(), Box::new(SortedAddReducer));
            }
            if let Some(sub) = &node.node {
                collect_node_fields(sub, schema);
            }
        }
        NodeKind::Passthrough => {
            for key in node.output.keys() {
                schema.add_field(key.clone(), Box::new(LastValueReducer));
            }
        }
        NodeKind::Interrupt => {
            if let Some(resume_key) = &node.resume_key {
                schema.add_field(resume_key.clone(), Box::new(LastValueReducer));
            }
        }
        NodeKind::Subgraph => {
            for parent_key in node.output_mapping.values() {
                schema.add_field(parent_key.clone(), Box::new(LastValueReducer));
            }
            for parent_key in node.interrupt_output_mapping.values() {
                schema.add_field(parent_key.clone(), Box::new(LastValueReducer));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_str;
    use serde_json::json;

    fn config(yaml: &str) -> WorkflowConfig {
        load_str(yaml).unwrap()
    }

    #[test]
    fn test_state_keys_get_last_value_reducer() {
        let cfg = config(
            r#"
name: t
nodes:
  a:
    type: llm
    prompt: p
    state_key: summary
edges: []
"#,
        );
        let schema = build_schema(&cfg, &HashMap::new());
        assert_eq!(schema.reducer_name("summary"), Some("last"));
    }

    #[test]
    fn test_map_collect_gets_sorted_add() {
        let cfg = config(
            r#"
name: t
nodes:
  fanout:
    type: map
    over: "{state.items}"
    collect: results
    node:
      type: llm
      prompt: p
      state_key: piece
edges: []
"#,
        );
        let schema = build_schema(&cfg, &HashMap::new());
        assert_eq!(schema.reducer_name("results"), Some("sorted_add"));
        // The sub-node's own state key is part of the schema too
        assert_eq!(schema.reducer_name("piece"), Some("last"));
    }

    #[test]
    fn test_system_fields_present() {
        let cfg = config(
            r#"
name: t
nodes:
  a:
    type: passthrough
    output:
      doubled: "{state.n * 2}"
edges: []
"#,
        );
        let schema = build_schema(&cfg, &HashMap::new());
        assert_eq!(schema.reducer_name(ERRORS_KEY), Some("list_append"));
        assert_eq!(schema.reducer_name(TOKEN_USAGE_KEY), Some("numeric_add"));
        assert_eq!(schema.reducer_name(LOOP_COUNTS_KEY), Some("dict_merge"));
        assert_eq!(schema.reducer_name(CURRENT_STEP_KEY), Some("last"));
        assert_eq!(schema.reducer_name("doubled"), Some("last"));
    }

    #[test]
    fn test_data_files_seed_initial_state() {
        let cfg = config(
            r#"
name: t
nodes:
  a:
    type: passthrough
    output:
      echo: "{state.corpus}"
edges: []
"#,
        );
        let mut data = HashMap::new();
        data.insert("corpus".to_string(), json!({"docs": ["a", "b"]}));

        let schema = build_schema(&cfg, &data);
        let state = schema.initial_state(&json!({})).unwrap();
        assert_eq!(state["corpus"]["docs"][0], "a");
    }

    #[test]
    fn test_input_beats_data_file_seed() {
        let cfg = config(
            r#"
name: t
nodes:
  a:
    type: passthrough
    output:
      echo: "{state.corpus}"
edges: []
"#,
        );
        let mut data = HashMap::new();
        data.insert("corpus".to_string(), json!("from-file"));

        let schema = build_schema(&cfg, &data);
        let state = schema.initial_state(&json!({"corpus": "from-input"})).unwrap();
        assert_eq!(state["corpus"], "from-input");
    }
}
