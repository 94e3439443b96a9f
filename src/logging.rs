use std::io;

use serde_json::{Map, Value};
use tracing_subscriber::{fmt, EnvFilter};

const REDACTED: &str = "[REDACTED]";

/// Install the global subscriber. Output goes to stderr: stdout carries protocol frames.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Copy of request params that is safe to put in an audit log line.
pub fn redact_audit_params(params: Option<&Map<String, Value>>) -> Value {
    params.map(redact_object).unwrap_or(Value::Null)
}

fn redact_object(map: &Map<String, Value>) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, item)| {
                let value = if is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    redact_value(item)
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => redact_object(map),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || ["token", "secret", "password", "credential"]
        .iter()
        .any(|marker| normalized.contains(marker))
}
