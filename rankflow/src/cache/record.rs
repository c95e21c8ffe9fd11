//! On-disk envelope for cached products.

use crate::core::{DataProduct, Fingerprint};
use crate::errors::{CacheCorruptionError, CacheError};
use serde::{Deserialize, Serialize};

/// Version of the on-disk record layout.
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// A cached product together with its integrity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Layout version the record was written with.
    pub format_version: u32,
    /// The key the record was published under.
    pub fingerprint: Fingerprint,
    /// SHA-256 over the serialized product.
    pub checksum: String,
    /// The product itself.
    pub product: DataProduct,
}

fn checksum(product: &DataProduct) -> Result<String, CacheError> {
    let bytes = serde_json::to_vec(product)?;
    Ok(Fingerprint::of_bytes(&bytes).as_str().to_string())
}

impl ProductRecord {
    /// Wraps a product for publication under `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the product cannot be serialized.
    pub fn seal(fingerprint: &Fingerprint, product: &DataProduct) -> Result<Self, CacheError> {
        Ok(Self {
            format_version: RECORD_FORMAT_VERSION,
            fingerprint: fingerprint.clone(),
            checksum: checksum(product)?,
            product: product.clone(),
        })
    }

    /// Parses and verifies a record read for `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corrupted`] if the bytes do not parse, the
    /// layout version is unknown, either fingerprint disagrees with the key,
    /// or the checksum does not match.
    pub fn open(bytes: &[u8], expected: &Fingerprint) -> Result<DataProduct, CacheError> {
        let corrupt = |reason: String| CacheError::from(CacheCorruptionError::new(expected.as_str(), reason));

        let record: Self = serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable record: {e}")))?;

        if record.format_version != RECORD_FORMAT_VERSION {
            return Err(corrupt(format!("unsupported record version {}", record.format_version)));
        }
        if &record.fingerprint != expected || record.product.fingerprint() != expected {
            return Err(corrupt(format!(
                "fingerprint mismatch: record {}, product {}",
                record.fingerprint,
                record.product.fingerprint()
            )));
        }
        let actual = checksum(&record.product)?;
        if actual != record.checksum {
            return Err(corrupt(format!("checksum mismatch: expected {}, got {actual}", record.checksum)));
        }

        Ok(record.product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Payload;
    use serde_json::json;

    fn product() -> (Fingerprint, DataProduct) {
        let fp = Fingerprint::of_bytes(b"stage").for_output("gains");
        let product = DataProduct::new("gains", "calibrate", fp.clone(), Payload::from(json!({"g": [1.0, 0.5]})));
        (fp, product)
    }

    #[test]
    fn test_seal_and_open() {
        let (fp, product) = product();
        let bytes = serde_json::to_vec(&ProductRecord::seal(&fp, &product).unwrap()).unwrap();
        assert_eq!(ProductRecord::open(&bytes, &fp).unwrap(), product);
    }

    #[test]
    fn test_open_rejects_tampered_checksum() {
        let (fp, product) = product();
        let mut record = ProductRecord::seal(&fp, &product).unwrap();
        record.checksum = "0".repeat(64);
        let bytes = serde_json::to_vec(&record).unwrap();

        let err = ProductRecord::open(&bytes, &fp).unwrap_err();
        assert!(matches!(err, CacheError::Corrupted(_)));
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let (fp, product) = product();
        let bytes = serde_json::to_vec(&ProductRecord::seal(&fp, &product).unwrap()).unwrap();
        let other = Fingerprint::of_bytes(b"other");

        assert!(matches!(ProductRecord::open(&bytes, &other), Err(CacheError::Corrupted(_))));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let (fp, _) = product();
        assert!(matches!(ProductRecord::open(b"{not json", &fp), Err(CacheError::Corrupted(_))));
    }
}
