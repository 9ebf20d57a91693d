//! Expression and condition language
//!
//! Two small, safe, regex-driven sub-languages share the literal tokenizer
//! in this module:
//!
//! - **Value expressions** (`{state.path}`, `{state.count + 1}`) used by
//!   `variables`, `output`, `over`, and dynamic tool arguments — see
//!   [`value`].
//! - **Condition expressions** (`critique.score < 0.8 and status == 'open'`)
//!   used by edge conditions — see [`condition`].
//!
//! Neither language evaluates arbitrary code: value expressions allow one
//! binary arithmetic step at most, conditions are flat and/or chains of
//! comparisons. Anything else is an `ExpressionError`.

pub mod condition;
pub mod value;

pub use condition::eval_condition;
pub use value::eval_value_expr;

use serde_json::Value;

/// Parse a scalar literal: quoted string, boolean, null, or number.
pub(crate) fn parse_literal(raw: &str) -> Option<Value> {
    let t = raw.trim();

    if let Some(s) = strip_quotes(t) {
        return Some(Value::String(s.to_string()));
    }

    match t {
        "true" | "True" => return Some(Value::Bool(true)),
        "false" | "False" => return Some(Value::Bool(false)),
        "null" | "none" | "None" => return Some(Value::Null),
        _ => {}
    }

    if let Ok(n) = t.parse::<i64>() {
        return Some(Value::Number(n.into()));
    }
    if let Ok(f) = t.parse::<f64>() {
        return serde_json::Number::from_f64(f).map(Value::Number);
    }

    None
}

/// Strip a matched pair of single or double quotes, if present.
pub(crate) fn strip_quotes(raw: &str) -> Option<&str> {
    let t = raw.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        if (bytes[0] == b'\'' && bytes[t.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[t.len() - 1] == b'"')
        {
            return Some(&t[1..t.len() - 1]);
        }
    }
    None
}

/// Split on a separator, honoring single- and double-quoted regions.
///
/// Used for the `and`/`or` split in conditions and for top-level commas in
/// dict literals. The separator never matches inside quotes.
pub(crate) fn split_outside_quotes<'a>(input: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let bytes = input.as_bytes();
    let sep_bytes = sep.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            _ => {}
        }

        if !in_single && !in_double && bytes[i..].starts_with(sep_bytes) {
            parts.push(&input[start..i]);
            i += sep_bytes.len();
            start = i;
            continue;
        }
        i += 1;
    }

    parts.push(&input[start..]);
    parts
}

/// Whether `input` contains an infix arithmetic operator at the top level
/// (outside quotes, brackets and braces).
///
/// Operators glued to a leading sign (`-5`) do not count; the scan looks for
/// an operator that has an operand on both sides.
pub(crate) fn has_top_level_operator(input: &str) -> bool {
    let bytes = input.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut depth = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'[' | b'{' if !in_single && !in_double => depth += 1,
            b']' | b'}' if !in_single && !in_double => depth = depth.saturating_sub(1),
            b'+' | b'-' | b'*' | b'/' if !in_single && !in_double && depth == 0 => {
                let has_left = input[..i].trim_end().chars().last().is_some_and(|c| {
                    c.is_alphanumeric() || c == '_' || c == ']' || c == '}' || c == '.' || c == '\'' || c == '"'
                });
                let has_right = !input[i + 1..].trim_start().is_empty();
                if has_left && has_right {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_literal_forms() {
        assert_eq!(parse_literal("'hi'"), Some(json!("hi")));
        assert_eq!(parse_literal("\"hi\""), Some(json!("hi")));
        assert_eq!(parse_literal("true"), Some(json!(true)));
        assert_eq!(parse_literal("None"), Some(Value::Null));
        assert_eq!(parse_literal("42"), Some(json!(42)));
        assert_eq!(parse_literal("-3.5"), Some(json!(-3.5)));
        assert_eq!(parse_literal("banana"), None);
    }

    #[test]
    fn test_split_outside_quotes_respects_quoting() {
        let parts = split_outside_quotes("status == 'done and dusted' and x == 1", " and ");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], "status == 'done and dusted'");
        assert_eq!(parts[1], "x == 1");
    }

    #[test]
    fn test_split_no_separator() {
        assert_eq!(split_outside_quotes("a == 1", " or "), vec!["a == 1"]);
    }

    #[test]
    fn test_has_top_level_operator() {
        assert!(has_top_level_operator("state.a + state.b"));
        assert!(has_top_level_operator("1 + 2"));
        assert!(!has_top_level_operator("-5"));
        assert!(!has_top_level_operator("state.a"));
        assert!(!has_top_level_operator("'a + b'"));
        assert!(!has_top_level_operator("[1]"));
    }
}
