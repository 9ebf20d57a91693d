//! State object and reducer system
//!
//! Run state is a JSON object. Nodes never mutate it directly; they return
//! update objects, and the engine merges each update through the reducer
//! assigned to its key. Reducers are pure: given the current value and the
//! update, they produce the next value.
//!
//! # Built-in reducers
//!
//! | Reducer | Behavior | Used for |
//! |---------|----------|----------|
//! | [`LastValueReducer`] | last write wins | plain `state_key` fields |
//! | [`ListConcatReducer`] | concatenate, wrap scalars | `errors` |
//! | [`SortedAddReducer`] | extend then sort by `_map_index` | map `collect` fields |
//! | [`NumericAddReducer`] | numeric accumulation | `_token_usage` |
//! | [`DictMergeReducer`] | shallow key merge | `_loop_counts` |
//!
//! # Example
//!
//! ```rust
//! use cascade_core::state::{ListConcatReducer, StateSchema};
//! use serde_json::json;
//!
//! let mut schema = StateSchema::new();
//! schema.add_field("errors", Box::new(ListConcatReducer));
//!
//! let mut state = json!({"errors": ["first"]});
//! schema.apply(&mut state, &json!({"errors": ["second"]})).unwrap();
//! assert_eq!(state["errors"], json!(["first", "second"]));
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Reserved state key: list of recorded errors (list-concat)
pub const ERRORS_KEY: &str = "errors";
/// Reserved state key: node name most recently run (last-writer-wins)
pub const CURRENT_STEP_KEY: &str = "current_step";
/// Reserved state key: per-node scheduling counts (dict-merge)
pub const LOOP_COUNTS_KEY: &str = "_loop_counts";
/// Reserved state key: accumulated token usage (numeric add)
pub const TOKEN_USAGE_KEY: &str = "_token_usage";
/// Reserved state key: interrupt payload, present only while suspended
pub const INTERRUPT_KEY: &str = "__interrupt__";
/// Reserved state key: route label emitted by the last router node
pub const ROUTE_KEY: &str = "_route";
/// Key stamped onto each map sub-task result for ordered fan-in
pub const MAP_INDEX_KEY: &str = "_map_index";
/// Marker set when a node was skipped by its error policy
pub const SKIPPED_KEY: &str = "_skipped";

/// Errors that can occur while merging state
#[derive(Debug, Error)]
pub enum StateError {
    /// State or update is not an object
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reducer encountered incompatible types
    #[error("Reducer error: {0}")]
    ReducerError(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Pure merge function for one state key
pub trait Reducer: Send + Sync {
    /// Combine the current value (possibly null) with an update
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Human-readable reducer name
    fn name(&self) -> &str;
}

/// Last-writer-wins
#[derive(Debug, Clone)]
pub struct LastValueReducer;

impl Reducer for LastValueReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "last"
    }
}

/// Concatenates lists; scalar updates are appended as single elements
#[derive(Debug, Clone)]
pub struct ListConcatReducer;

impl Reducer for ListConcatReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Array(curr), Value::Array(upd)) => {
                let mut result = curr.clone();
                result.extend_from_slice(upd);
                Ok(Value::Array(result))
            }
            (Value::Null, Value::Array(upd)) => Ok(Value::Array(upd.clone())),
            (Value::Array(curr), single) => {
                let mut result = curr.clone();
                result.push(single.clone());
                Ok(Value::Array(result))
            }
            (Value::Null, single) => Ok(Value::Array(vec![single.clone()])),
            _ => Err(StateError::ReducerError(
                "list_append requires an array on the left".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "list_append"
    }
}

/// Extends a list, then sorts it by each element's `_map_index`
///
/// Elements without an index sort after indexed ones, preserving their
/// insertion order (the sort is stable).
#[derive(Debug, Clone)]
pub struct SortedAddReducer;

impl SortedAddReducer {
    fn index_of(value: &Value) -> i64 {
        value
            .get(MAP_INDEX_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(i64::MAX)
    }
}

impl Reducer for SortedAddReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        let mut items = match current {
            Value::Array(curr) => curr.clone(),
            Value::Null => Vec::new(),
            _ => {
                return Err(StateError::ReducerError(
                    "sorted_add requires an array on the left".to_string(),
                ))
            }
        };

        match update {
            Value::Array(upd) => items.extend_from_slice(upd),
            single => items.push(single.clone()),
        }

        items.sort_by_key(Self::index_of);
        Ok(Value::Array(items))
    }

    fn name(&self) -> &str {
        "sorted_add"
    }
}

/// Adds numeric values; integer pairs stay integers
#[derive(Debug, Clone)]
pub struct NumericAddReducer;

impl Reducer for NumericAddReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Number(a), Value::Number(b)) => {
                if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                    Ok(Value::Number((a + b).into()))
                } else if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
                    Ok(serde_json::Number::from_f64(a + b)
                        .map(Value::Number)
                        .unwrap_or(Value::Null))
                } else {
                    Err(StateError::ReducerError(
                        "numeric_add cannot combine these numbers".to_string(),
                    ))
                }
            }
            (Value::Null, Value::Number(_)) => Ok(update.clone()),
            _ => Err(StateError::ReducerError(
                "numeric_add requires numeric values".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "numeric_add"
    }
}

/// Shallow object merge; update keys win on conflict
#[derive(Debug, Clone)]
pub struct DictMergeReducer;

impl Reducer for DictMergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Object(curr), Value::Object(upd)) => {
                let mut result = curr.clone();
                for (key, value) in upd {
                    result.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(result))
            }
            (Value::Null, Value::Object(upd)) => Ok(Value::Object(upd.clone())),
            _ => Err(StateError::ReducerError(
                "dict_merge requires object values".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "dict_merge"
    }
}

/// Schema mapping state keys to reducers, with seeded initial values
#[derive(Default)]
pub struct StateSchema {
    fields: HashMap<String, Box<dyn Reducer>>,
    initial: Map<String, Value>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a reducer to a field
    pub fn add_field(&mut self, field: impl Into<String>, reducer: Box<dyn Reducer>) {
        self.fields.insert(field.into(), reducer);
    }

    /// Seed an initial value for a field (data files)
    pub fn seed(&mut self, field: impl Into<String>, value: Value) {
        self.initial.insert(field.into(), value);
    }

    /// Whether the schema declares a field
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Reducer name for a field, if declared
    pub fn reducer_name(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|r| r.name())
    }

    /// Declared field names
    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Build the starting state: seeded values overlaid with run input.
    ///
    /// Input wins on collision with a data-file seed.
    pub fn initial_state(&self, input: &Value) -> Result<Value> {
        let mut state = self.initial.clone();
        if let Value::Object(input_obj) = input {
            for (key, value) in input_obj {
                state.insert(key.clone(), value.clone());
            }
        } else if !input.is_null() {
            return Err(StateError::InvalidState(
                "run input must be an object".to_string(),
            ));
        }
        Ok(Value::Object(state))
    }

    /// Merge a node-returned update into state via the reducer table.
    ///
    /// Keys with no declared reducer overwrite.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let state_obj = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("state must be an object".to_string()))?;

        let update_obj = update
            .as_object()
            .ok_or_else(|| StateError::InvalidState("update must be an object".to_string()))?;

        for (key, update_value) in update_obj {
            let current = state_obj.get(key).cloned().unwrap_or(Value::Null);
            let next = match self.fields.get(key) {
                Some(reducer) => reducer.reduce(&current, update_value)?,
                None => update_value.clone(),
            };
            state_obj.insert(key.clone(), next);
        }

        Ok(())
    }
}

/// Read a dotted path out of a state value, `None` if any segment is missing.
pub fn lookup_path<'a>(state: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = state;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
