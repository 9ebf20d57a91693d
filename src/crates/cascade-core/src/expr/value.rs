//! Value expressions: `{state.path}` lookups and single-step arithmetic
//!
//! Payload forms inside the braces:
//!
//! 1. `state.<dotted.path>` — lookup; `None` if any segment is missing.
//! 2. `state.<path> <op> <operand>` with `op ∈ {+,-,*,/}` and operand one of
//!    a numeric literal, another state reference, a single-item list literal
//!    `[item]`, or a dict literal `{'k': v}`. Division always produces a
//!    float; division by zero is fatal. A missing left operand makes the
//!    whole expression `None`.
//! 3. Anything with three or more operands is rejected.
//!
//! Adding to a list auto-wraps a non-list right operand and always produces
//! a fresh list. Strings that are not brace-delimited pass through as
//! literals.

use super::{has_top_level_operator, parse_literal, split_outside_quotes, strip_quotes};
use crate::error::{EngineError, Result};
use crate::state::lookup_path;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::OnceLock;

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^state\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)$").unwrap())
}

fn arith_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^state\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*([+\-*/])\s*(.+)$")
            .unwrap()
    })
}

/// Evaluate a `variables`/`output`/`over` binding against state.
///
/// Non-string values and strings that are not `{...}` expressions pass
/// through unchanged.
pub fn eval_value_expr(raw: &Value, state: &Value) -> Result<Value> {
    let text = match raw {
        Value::String(s) => s,
        other => return Ok(other.clone()),
    };

    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return Ok(Value::String(text.clone()));
    }

    let payload = trimmed[1..trimmed.len() - 1].trim();
    eval_payload(payload, state).map_err(|e| match e {
        EngineError::ExpressionError { detail, .. } => EngineError::expression(text, detail),
        other => other,
    })
}

/// Evaluate an expression payload (the text between the braces).
pub fn eval_payload(payload: &str, state: &Value) -> Result<Value> {
    if let Some(caps) = path_re().captures(payload) {
        return Ok(lookup_path(state, &caps[1]).cloned().unwrap_or(Value::Null));
    }

    if let Some(caps) = arith_re().captures(payload) {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let op = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let operand_text = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();

        // Three or more operands: reject before touching state.
        if !is_single_operand(operand_text) && has_top_level_operator(operand_text) {
            return Err(EngineError::expression(
                payload,
                "chained arithmetic is not supported",
            ));
        }

        let left = match lookup_path(state, path) {
            Some(v) if !v.is_null() => v.clone(),
            _ => return Ok(Value::Null),
        };

        let right = parse_operand(operand_text, state)?;
        if right.is_null() {
            return Ok(Value::Null);
        }

        return apply_op(payload, &left, op, &right);
    }

    Err(EngineError::expression(
        payload,
        "expected 'state.<path>' optionally followed by one operator and operand",
    ))
}

// An operand is "single" when it parses as one of the allowed forms on its
// own; list and dict literals may legitimately contain commas and colons.
fn is_single_operand(text: &str) -> bool {
    parse_literal(text).is_some()
        || path_re().is_match(text)
        || (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('{') && text.ends_with('}'))
}

fn parse_operand(text: &str, state: &Value) -> Result<Value> {
    if let Some(value) = parse_literal(text) {
        return Ok(value);
    }

    if let Some(caps) = path_re().captures(text) {
        return Ok(lookup_path(state, &caps[1]).cloned().unwrap_or(Value::Null));
    }

    if text.starts_with('[') && text.ends_with(']') {
        return parse_list_literal(&text[1..text.len() - 1], state);
    }

    if text.starts_with('{') && text.ends_with('}') {
        return parse_dict_literal(&text[1..text.len() - 1], state);
    }

    if has_top_level_operator(text) {
        return Err(EngineError::expression(
            text,
            "chained arithmetic is not supported",
        ));
    }

    Err(EngineError::expression(
        text,
        "operand must be a number, state reference, list literal or dict literal",
    ))
}

fn parse_list_literal(inner: &str, state: &Value) -> Result<Value> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let item = parse_item(inner, state)?;
    Ok(Value::Array(vec![item]))
}

fn parse_dict_literal(inner: &str, state: &Value) -> Result<Value> {
    let mut map = Map::new();
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Value::Object(map));
    }

    for entry in split_outside_quotes(inner, ",") {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parts = split_outside_quotes(entry, ":");
        if parts.len() != 2 {
            return Err(EngineError::expression(
                entry,
                "dict entries must be 'key': value",
            ));
        }
        let key = strip_quotes(parts[0]).ok_or_else(|| {
            EngineError::expression(parts[0], "dict keys must be quoted strings")
        })?;
        let value = parse_item(parts[1].trim(), state)?;
        map.insert(key.to_string(), value);
    }

    Ok(Value::Object(map))
}

// Items inside list/dict literals: scalar literal or state reference.
fn parse_item(text: &str, state: &Value) -> Result<Value> {
    if let Some(value) = parse_literal(text) {
        return Ok(value);
    }
    if let Some(caps) = path_re().captures(text) {
        return Ok(lookup_path(state, &caps[1]).cloned().unwrap_or(Value::Null));
    }
    Err(EngineError::expression(
        text,
        "expected a literal or state reference",
    ))
}

fn apply_op(payload: &str, left: &Value, op: &str, right: &Value) -> Result<Value> {
    // List addition: auto-wrap the right operand, always a fresh list.
    if let (Value::Array(items), "+") = (left, op) {
        let mut result = items.clone();
        match right {
            Value::Array(more) => result.extend_from_slice(more),
            other => result.push(other.clone()),
        }
        return Ok(Value::Array(result));
    }

    // Dict addition merges shallowly; right side wins.
    if let (Value::Object(base), "+", Value::Object(overlay)) = (left, op, right) {
        let mut result = base.clone();
        for (k, v) in overlay {
            result.insert(k.clone(), v.clone());
        }
        return Ok(Value::Object(result));
    }

    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(EngineError::expression(
            payload,
            format!(
                "cannot apply '{}' to {} and {}",
                op,
                type_name(left),
                type_name(right)
            ),
        ));
    };

    if op == "/" {
        let denom = b.as_f64().unwrap_or(0.0);
        if denom == 0.0 {
            return Err(EngineError::expression(payload, "division by zero"));
        }
        let value = a.as_f64().unwrap_or(0.0) / denom;
        return Ok(Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null));
    }

    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let value = match op {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            _ => unreachable!(),
        };
        return Ok(Value::Number(value.into()));
    }

    let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
    let value = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        _ => unreachable!(),
    };
    Ok(Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
