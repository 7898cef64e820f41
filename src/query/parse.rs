//! Query specification parsing.

use std::time::Duration;

use serde_json::Value;

use crate::clock::ClockSpec;

use super::expr::TermRegistry;
use super::fields::KNOWN_FIELDS;
use super::{PathSpec, Query, QueryParseError};

/// Parse a query specification object.
///
/// `default_sync_timeout` applies when the spec does not carry its own
/// `sync_timeout`.
pub fn parse_query(
    registry: &TermRegistry,
    spec: &Value,
    default_sync_timeout: Duration,
) -> Result<Query, QueryParseError> {
    let obj = spec
        .as_object()
        .ok_or_else(|| QueryParseError::new("query spec must be an object"))?;

    let expression = match obj.get("expression") {
        None | Some(Value::Null) => None,
        Some(term) => Some(registry.parse_term(term)?),
    };

    let paths = match obj.get("path") {
        None => None,
        Some(value) => Some(parse_paths(value)?),
    };

    let globs = match obj.get("glob") {
        None => None,
        Some(Value::Array(arr)) => {
            let globs = arr
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| QueryParseError::new("glob patterns must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Some(globs)
        }
        Some(_) => return Err(QueryParseError::new("'glob' must be an array of strings")),
    };

    let field_list = match obj.get("fields") {
        None => KNOWN_FIELDS.iter().map(|s| s.to_string()).collect(),
        Some(value) => parse_field_list(value)?,
    };

    let relative_root = match obj.get("relative_root") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(QueryParseError::new("'relative_root' must be a string")),
    };

    let since_spec = match obj.get("since") {
        None | Some(Value::Null) => None,
        Some(value) => Some(ClockSpec::parse(value)?),
    };

    let dedup_results = match obj.get("dedup_results") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(QueryParseError::new("'dedup_results' must be a boolean")),
    };

    let sync_timeout = match obj.get("sync_timeout") {
        None => default_sync_timeout,
        Some(value) => {
            let ms = value
                .as_i64()
                .ok_or_else(|| QueryParseError::new("'sync_timeout' must be an integer"))?;
            if ms < 0 {
                return Err(QueryParseError::new("'sync_timeout' must be >= 0"));
            }
            Duration::from_millis(ms as u64)
        }
    };

    Ok(Query {
        expression,
        paths,
        globs,
        field_list,
        relative_root,
        since_spec,
        dedup_results,
        sync_timeout,
    })
}

fn parse_paths(value: &Value) -> Result<Vec<PathSpec>, QueryParseError> {
    let arr = value
        .as_array()
        .ok_or_else(|| QueryParseError::new("'path' must be an array"))?;
    arr.iter()
        .map(|entry| match entry {
            Value::String(name) => Ok(PathSpec {
                name: name.clone(),
                depth: -1,
            }),
            Value::Object(obj) => {
                let name = obj
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| QueryParseError::new("path object requires a 'path' string"))?;
                let depth = obj
                    .get("depth")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| QueryParseError::new("path object requires integer 'depth'"))?;
                Ok(PathSpec {
                    name: name.to_string(),
                    depth,
                })
            }
            _ => Err(QueryParseError::new(
                "'path' entries must be strings or {path, depth} objects",
            )),
        })
        .collect()
}

/// Validate and normalize a field list value.
pub fn parse_field_list(value: &Value) -> Result<Vec<String>, QueryParseError> {
    let arr = value
        .as_array()
        .ok_or_else(|| QueryParseError::new("field list must be an array of strings"))?;
    if arr.is_empty() {
        return Err(QueryParseError::new("field list must not be empty"));
    }
    arr.iter()
        .map(|v| {
            let name = v
                .as_str()
                .ok_or_else(|| QueryParseError::new("field list must be an array of strings"))?;
            if !KNOWN_FIELDS.contains(&name) {
                return Err(QueryParseError::new(format!("unknown field name '{name}'")));
            }
            Ok(name.to_string())
        })
        .collect()
}
