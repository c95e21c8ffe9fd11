//! Data products exchanged between stages.

use super::{Fingerprint, NdArray};
use serde::{Deserialize, Serialize};

/// The content of a data product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// A dense numeric array.
    Array(NdArray),
    /// A structured value (metadata, masks, scalars, tables).
    Value(serde_json::Value),
}

impl Payload {
    /// Returns the array, if this payload holds one.
    #[must_use]
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Self::Array(arr) => Some(arr),
            Self::Value(_) => None,
        }
    }

    /// Returns the structured value, if this payload holds one.
    #[must_use]
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Array(_) => None,
        }
    }
}

impl From<NdArray> for Payload {
    fn from(arr: NdArray) -> Self {
        Self::Array(arr)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

/// An immutable, identified unit of stage output.
///
/// The fingerprint is derived from the producing stage's configuration and
/// the fingerprints of its inputs, never from the payload, so a product can
/// be looked up in the cache before the stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProduct {
    name: String,
    producer: String,
    fingerprint: Fingerprint,
    payload: Payload,
}

impl DataProduct {
    /// Creates a new data product.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        producer: impl Into<String>,
        fingerprint: Fingerprint,
        payload: Payload,
    ) -> Self {
        Self {
            name: name.into(),
            producer: producer.into(),
            fingerprint,
            payload,
        }
    }

    /// Returns the output name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the producing stage name.
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Returns the content fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the payload as an array, if it is one.
    #[must_use]
    pub fn array(&self) -> Option<&NdArray> {
        self.payload.as_array()
    }

    /// Returns the payload as a structured value, if it is one.
    #[must_use]
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.payload.as_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_accessors() {
        let arr: Payload = NdArray::from_vec(vec![1.0]).into();
        assert!(arr.as_array().is_some());
        assert!(arr.as_value().is_none());

        let val: Payload = json!({"nfreq": 1024}).into();
        assert_eq!(val.as_value().unwrap()["nfreq"], 1024);
    }

    #[test]
    fn test_product_serialization() {
        let fp = Fingerprint::of_bytes(b"stage").for_output("mask");
        let product = DataProduct::new("mask", "flag", fp.clone(), json!([true, false]).into());

        let json = serde_json::to_string(&product).unwrap();
        assert!(json.contains(r#""type":"value""#));

        let back: DataProduct = serde_json::from_str(&json).unwrap();
        assert_eq!(back, product);
        assert_eq!(back.fingerprint(), &fp);
        assert_eq!(back.producer(), "flag");
    }
}
