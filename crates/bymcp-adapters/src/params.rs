//! Typed access to JSON tool arguments.

use serde_json::Value;

use crate::error::{AdapterError, Result};

/// A required, non-empty string argument.
pub fn required_str<'a>(params: &'a Value, field: &str, tool: &str) -> Result<&'a str> {
    optional_str(params, field).ok_or_else(|| AdapterError::InvalidParams {
        tool_name: tool.into(),
        reason: format!("missing required string field `{field}`"),
    })
}

/// A string argument; empty strings count as absent.
pub fn optional_str<'a>(params: &'a Value, field: &str) -> Option<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// A required integer argument.
pub fn required_i64(params: &Value, field: &str, tool: &str) -> Result<i64> {
    match params.get(field) {
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| invalid(tool, field, "an integer")),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid(tool, field, "an integer")),
        _ => Err(AdapterError::InvalidParams {
            tool_name: tool.into(),
            reason: format!("missing required integer field `{field}`"),
        }),
    }
}

/// An optional integer argument with a default.
pub fn i64_or(params: &Value, field: &str, tool: &str, default: i64) -> Result<i64> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => required_i64(params, field, tool),
    }
}

/// An optional number argument with a default.
pub fn f64_or(params: &Value, field: &str, tool: &str, default: f64) -> Result<f64> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid(tool, field, "a number")),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid(tool, field, "a number")),
        Some(_) => Err(invalid(tool, field, "a number")),
    }
}

/// An optional boolean argument with a default.
pub fn bool_or(params: &Value, field: &str, tool: &str, default: bool) -> Result<bool> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
        Some(_) => Err(invalid(tool, field, "a boolean")),
    }
}

fn invalid(tool: &str, field: &str, expected: &str) -> AdapterError {
    AdapterError::InvalidParams {
        tool_name: tool.into(),
        reason: format!("field `{field}` must be {expected}"),
    }
}
