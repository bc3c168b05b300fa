//! Request fingerprints
//!
//! Two requests that differ only in key order, null fields or surrounding
//! whitespace produce the same fingerprint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Stable identity of a downstream request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(Uuid);

impl Fingerprint {
    /// Fingerprint `request` sent to `endpoint`
    pub fn of(endpoint: &str, request: &Value) -> Self {
        let normalized = normalize(request);
        let name = format!("{}\n{}", endpoint.trim(), normalized);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Sorted keys, nulls dropped from objects, strings trimmed
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), normalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = Fingerprint::of("analysis", &json!({"model": "m1", "dataset": "d1"}));
        let b = Fingerprint::of("analysis", &json!({"dataset": "d1", "model": "m1"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nulls_and_whitespace_ignored() {
        let a = Fingerprint::of("analysis", &json!({"model": " m1 ", "threshold": null}));
        let b = Fingerprint::of("analysis", &json!({"model": "m1"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_values_normalized() {
        let a = Fingerprint::of("analysis", &json!({"opts": {"b": 1, "a": [" x "]}}));
        let b = Fingerprint::of("analysis", &json!({"opts": {"a": ["x"], "b": 1}}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_endpoint_and_values_distinguish() {
        let req = json!({"model": "m1"});
        assert_ne!(Fingerprint::of("analysis", &req), Fingerprint::of("compliance", &req));
        assert_ne!(
            Fingerprint::of("analysis", &req),
            Fingerprint::of("analysis", &json!({"model": "m2"}))
        );
    }

    #[test]
    fn test_display_is_hex() {
        let fp = Fingerprint::of("analysis", &json!({}));
        let shown = fp.to_string();
        assert_eq!(shown.len(), 32);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
