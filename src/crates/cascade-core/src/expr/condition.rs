//! Condition expressions for edge routing
//!
//! Grammar (no braces, no `state.` prefix):
//!
//! ```text
//! or_expr    := and_expr ( ' or ' and_expr )*
//! and_expr   := comparison ( ' and ' comparison )*
//! comparison := path op rhs        op ∈ { <, <=, >, >=, ==, != }
//! ```
//!
//! The `and`/`or` split is quote-aware: separators inside single- or
//! double-quoted strings do not split. The right operand parses in priority
//! order: quoted string → boolean/null keyword → numeric literal → dotted
//! identifier tried as a state path, falling back to a raw string when the
//! path is absent. Parentheses, `not`, and arithmetic are rejected.
//!
//! Missing left values: ordering comparisons are `false`; `==`/`!=` compare
//! against `None`.

use super::{has_top_level_operator, parse_literal, split_outside_quotes, strip_quotes};
use crate::error::{EngineError, Result};
use crate::state::lookup_path;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn comparison_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*(==|!=|<=|>=|<|>)\s*(.+?)\s*$",
        )
        .unwrap()
    })
}

/// Evaluate an edge condition against the post-merge state.
pub fn eval_condition(expr: &str, state: &Value) -> Result<bool> {
    reject_unsupported(expr)?;

    for or_part in split_outside_quotes(expr, " or ") {
        let mut all = true;
        for and_part in split_outside_quotes(or_part, " and ") {
            if !eval_comparison(and_part.trim(), state)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

fn reject_unsupported(expr: &str) -> Result<()> {
    // Scan outside quotes for parentheses and the `not` keyword.
    let mut in_single = false;
    let mut in_double = false;
    let bytes = expr.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'(' | b')' if !in_single && !in_double => {
                return Err(EngineError::expression(
                    expr,
                    "parentheses are not supported in conditions",
                ));
            }
            b'n' if !in_single && !in_double => {
                let boundary_before =
                    i == 0 || !bytes[i - 1].is_ascii_alphanumeric() && bytes[i - 1] != b'_';
                let is_not = bytes[i..].starts_with(b"not")
                    && bytes
                        .get(i + 3)
                        .map_or(true, |&c| !c.is_ascii_alphanumeric() && c != b'_' && c != b'.');
                if boundary_before && is_not {
                    return Err(EngineError::expression(
                        expr,
                        "'not' is not supported in conditions",
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn eval_comparison(text: &str, state: &Value) -> Result<bool> {
    let caps = comparison_re().captures(text).ok_or_else(|| {
        EngineError::expression(text, "expected '<path> <op> <value>'")
    })?;

    let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let op = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let rhs_text = caps.get(3).map(|m| m.as_str()).unwrap_or_default();

    // Arithmetic on the right side is nested expression territory.
    if strip_quotes(rhs_text).is_none() && has_top_level_operator(rhs_text) {
        return Err(EngineError::expression(
            text,
            "arithmetic is not supported in conditions",
        ));
    }

    let lhs = lookup_path(state, path).cloned();
    let rhs = parse_rhs(rhs_text, state);

    Ok(match op {
        "==" => values_equal(lhs.as_ref().unwrap_or(&Value::Null), &rhs),
        "!=" => !values_equal(lhs.as_ref().unwrap_or(&Value::Null), &rhs),
        _ => match lhs {
            // Missing or null left operand: ordering comparisons are false.
            None | Some(Value::Null) => false,
            Some(lhs) => compare_ordering(&lhs, op, &rhs),
        },
    })
}

/// Right operand resolution: quoted string → keyword → number → state path
/// → raw string.
fn parse_rhs(text: &str, state: &Value) -> Value {
    if let Some(s) = strip_quotes(text) {
        return Value::String(s.to_string());
    }
    if let Some(value) = parse_literal(text) {
        return value;
    }
    if let Some(value) = lookup_path(state, text) {
        return value.clone();
    }
    Value::String(text.to_string())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        // 1 == 1.0
        return match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        };
    }
    a == b
}

fn compare_ordering(lhs: &Value, op: &str, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                return false;
            };
            apply_ordering(op, a.partial_cmp(&b))
        }
        (Value::String(a), Value::String(b)) => apply_ordering(op, Some(a.cmp(b))),
        _ => false,
    }
}

fn apply_ordering(op: &str, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        "<" => ordering == Less,
        "<=" => ordering != Greater,
        ">" => ordering == Greater,
        ">=" => ordering != Less,
        _ => false,
    }
}
