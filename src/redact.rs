//! The redactor: a pluggable masking function, with a conservative default
//! implementation so the crate runs end to end.

use serde_json::Value;

const MASK: &str = "REDACTED";

/// Given a mapping and a list of sensitive keys, returns a copy with those
/// keys masked. Deployments that need different masking rules implement this
/// trait themselves and hand it to the keepalive engine.
pub trait Redactor: Send + Sync {
    fn redact(&self, value: &Value, sensitive_keys: &[String]) -> Value;
}

/// Masks matching top-level and nested object keys with the literal string
/// `"REDACTED"`. Arrays and scalars pass through unchanged except where a
/// scalar is itself the value of a sensitive key.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRedactor;

impl Redactor for DefaultRedactor {
    fn redact(&self, value: &Value, sensitive_keys: &[String]) -> Value {
        redact_value(value, sensitive_keys)
    }
}

fn redact_value(value: &Value, sensitive_keys: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    if sensitive_keys.iter().any(|s| s == k) {
                        (k.clone(), Value::String(MASK.to_string()))
                    } else {
                        (k.clone(), redact_value(v, sensitive_keys))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_value(v, sensitive_keys)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_top_level_sensitive_key() {
        let input = json!({"name": "h1", "password": "hunter2"});
        let out = DefaultRedactor.redact(&input, &["password".to_string()]);
        assert_eq!(out["password"], "REDACTED");
        assert_eq!(out["name"], "h1");
    }

    #[test]
    fn masks_nested_sensitive_key() {
        let input = json!({"db": {"name": "prod", "password": "s3cret"}});
        let out = DefaultRedactor.redact(&input, &["password".to_string()]);
        assert_eq!(out["db"]["password"], "REDACTED");
        assert_eq!(out["db"]["name"], "prod");
    }

    #[test]
    fn idempotent() {
        let input = json!({"password": "hunter2", "nested": {"password": "x"}});
        let keys = vec!["password".to_string()];
        let once = DefaultRedactor.redact(&input, &keys);
        let twice = DefaultRedactor.redact(&once, &keys);
        assert_eq!(once, twice);
    }

    #[test]
    fn no_sensitive_keys_is_noop() {
        let input = json!({"name": "h1"});
        let out = DefaultRedactor.redact(&input, &[]);
        assert_eq!(input, out);
    }
}
