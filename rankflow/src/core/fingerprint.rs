//! Content fingerprints used as cache keys.
//!
//! Parameters are hashed structurally: JSON values are rendered in a
//! canonical form (object keys sorted at every depth) before hashing, so two
//! configurations that differ only in key order share a fingerprint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Version of the fingerprint scheme. Bumping it invalidates every cache entry.
pub const FINGERPRINT_FORMAT_VERSION: u32 = 1;

/// A SHA-256 digest in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes raw bytes.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Hashes the canonical rendering of a JSON value.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        Self::of_bytes(to_canonical_json(value).as_bytes())
    }

    /// Parses a fingerprint from its hex form.
    ///
    /// Returns `None` unless the input is exactly 64 lowercase hex digits.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns an abbreviated form for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Derives the fingerprint of one named output of a stage.
    #[must_use]
    pub fn for_output(&self, output: &str) -> Self {
        Self::of_bytes(format!("{}:{}", self.0, output).as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Renders a JSON value with object keys sorted at every depth.
#[must_use]
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// Generates a short parameter hash for log lines and diagnostics.
#[must_use]
pub fn hash_parameters(params: &Value) -> String {
    let digest = Fingerprint::of_value(params);
    digest.as_str()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        assert_eq!(to_canonical_json(&a), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_key_order_does_not_change_fingerprint() {
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn test_value_change_changes_fingerprint() {
        let a = json!({"threshold": 5.0});
        let b = json!({"threshold": 5.5});
        assert_ne!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
        assert_ne!(hash_parameters(&a), hash_parameters(&b));
    }

    #[test]
    fn test_parse_and_short() {
        let fp = Fingerprint::of_bytes(b"data");
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(Fingerprint::parse(fp.as_str()), Some(fp.clone()));
        assert_eq!(fp.short().len(), 12);
        assert!(Fingerprint::parse("ABC").is_none());
        assert!(Fingerprint::parse(&"G".repeat(64)).is_none());
    }

    #[test]
    fn test_output_fingerprints_differ_per_output() {
        let stage = Fingerprint::of_bytes(b"stage");
        assert_ne!(stage.for_output("vis"), stage.for_output("weight"));
        assert_eq!(stage.for_output("vis"), stage.for_output("vis"));
    }
}
