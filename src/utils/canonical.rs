//! Canonical JSON: recursively sorted object keys, array order preserved,
//! compact serialization with no insignificant whitespace. Intent and policy
//! digests are SHA-256 over this form, so it must be byte-stable across
//! clients and relayers.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Rebuild `value` with every object's keys in sorted order.
fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut out = Map::new();
            for (key, val) in entries {
                out.insert(key.clone(), sort_value(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` canonically.
pub fn canonical_json_string(value: &Value) -> String {
    sort_value(value).to_string()
}

/// SHA-256 over the canonical serialization.
pub fn canonical_sha256(value: &Value) -> [u8; 32] {
    let serialized = canonical_json_string(value);
    let digest = Sha256::digest(serialized.as_bytes());
    digest.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_recursively() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": [3, {"y": 4, "x": 5}]});
        assert_eq!(
            canonical_json_string(&value),
            r#"{"a":[3,{"x":5,"y":4}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn idempotent() {
        let value = json!({"k": [1, 2, {"b": null, "a": true}], "j": "s"});
        let once = canonical_json_string(&value);
        let twice = canonical_json_string(&serde_json::from_str(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":{"p":2,"q":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":{"q":3,"p":2},"x":1}"#).unwrap();
        assert_eq!(canonical_sha256(&a), canonical_sha256(&b));
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(canonical_sha256(&a), canonical_sha256(&b));
    }

    #[test]
    fn string_escaping_is_stable() {
        let value = json!({"m": "line\nbreak \"quoted\""});
        assert_eq!(
            canonical_json_string(&value),
            r#"{"m":"line\nbreak \"quoted\""}"#
        );
    }
}
