use serde_json::{Map, Number, Value, json};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::tools::{ToolError, ToolHandler, ToolRegistry};

/// Turns a model-issued call into a serialized tool result. Every failure is
/// reported in-band as an `{"error": ...}` payload.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn invoke(&self, name: &str, arguments: &str) -> String {
        debug!(tool = name, arguments, "dispatching tool call");
        let handler = match self.registry.resolve(name) {
            Ok(h) => h,
            Err(e) => {
                warn!(tool = name, "model requested an unknown tool");
                return json!({ "error": e.to_string() }).to_string();
            }
        };

        let result = parse_arguments(handler.as_ref(), arguments)
            .and_then(|args| normalize_ranges(handler.as_ref(), args))
            .and_then(|args| run_handler(handler.as_ref(), args));

        let output = match result {
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                json!({ "error": e.to_string(), "tool": name }).to_string()
            }
        };
        debug!(tool = name, output = %output, "tool call result");
        output
    }
}

fn parse_arguments(
    handler: &dyn ToolHandler,
    arguments: &str,
) -> Result<Map<String, Value>, ToolError> {
    let invalid = |reason: String| ToolError::invalid(handler.id(), reason);
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(invalid(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(invalid(e.to_string())),
    }
}

fn normalize_ranges(
    handler: &dyn ToolHandler,
    mut args: Map<String, Value>,
) -> Result<Value, ToolError> {
    for &param in handler.range_params() {
        let Some(raw) = args.get(param) else {
            continue;
        };
        if raw.is_null() {
            args.remove(param);
            continue;
        }
        let [low, high] = parse_range(raw).ok_or_else(|| {
            ToolError::invalid(handler.id(), format!("{param} must be a [low, high] range, got {raw}"))
        })?;
        args.insert(param.to_string(), json!([number(low), number(high)]));
    }
    Ok(Value::Object(args))
}

fn run_handler(handler: &dyn ToolHandler, args: Value) -> Result<Value, ToolError> {
    match catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(tool = handler.id().name(), detail = %detail, "tool handler panicked");
            Err(ToolError::Failed(format!("tool panicked: {detail}")))
        }
    }
}

fn as_bound(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `[a, b]`, `{start|min, end|max}`, `"a-b"`, `"a,b"` or a single
/// number, returning the bounds in ascending order.
fn parse_range(v: &Value) -> Option<[f64; 2]> {
    let (a, b) = match v {
        Value::Array(items) if items.len() == 2 => (as_bound(&items[0])?, as_bound(&items[1])?),
        Value::Object(map) => {
            let low = map.get("start").or_else(|| map.get("min"))?;
            let high = map.get("end").or_else(|| map.get("max"))?;
            (as_bound(low)?, as_bound(high)?)
        }
        Value::String(s) => {
            let s = s.trim();
            // A leading '-' is the sign of the lower bound, not the separator.
            let sep = s
                .char_indices()
                .skip(1)
                .find(|&(_, c)| c == '-' || c == ',')
                .map(|(i, _)| i);
            match sep {
                Some(i) => (s[..i].trim().parse().ok()?, s[i + 1..].trim().parse().ok()?),
                None => {
                    let n = s.parse().ok()?;
                    (n, n)
                }
            }
        }
        Value::Number(n) => {
            let n = n.as_f64()?;
            (n, n)
        }
        _ => return None,
    };
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    Some(if a <= b { [a, b] } else { [b, a] })
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}
