//! Dense numeric arrays carried as stage payloads.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Errors raised when an array operation does not fit the array's shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeError {
    /// The data length does not match the product of the shape.
    #[error("shape {shape:?} needs {expected} elements, got {actual}")]
    LengthMismatch {
        /// The requested shape.
        shape: Vec<usize>,
        /// Elements implied by the shape.
        expected: usize,
        /// Elements supplied.
        actual: usize,
    },
    /// The operation needs at least one axis.
    #[error("operation requires an array with at least one axis")]
    Scalar,
    /// A row range falls outside the first axis.
    #[error("row range {start}..{end} out of bounds for {rows} rows")]
    OutOfBounds {
        /// Range start.
        start: usize,
        /// Range end.
        end: usize,
        /// Rows available.
        rows: usize,
    },
    /// Blocks being concatenated disagree on their trailing axes.
    #[error("cannot concatenate blocks with trailing shapes {left:?} and {right:?}")]
    Incompatible {
        /// Trailing shape of the first block.
        left: Vec<usize>,
        /// Trailing shape of the offending block.
        right: Vec<usize>,
    },
}

/// A row-major n-dimensional array of `f64` values.
///
/// The first axis is the distributed axis: [`NdArray::split_rows`] and
/// [`NdArray::concat_rows`] cut and rejoin blocks along it, matching the
/// block layout produced by [`crate::rank::partition::split`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    shape: Vec<usize>,
    #[serde(with = "f64_base64")]
    data: Vec<f64>,
}

impl NdArray {
    /// Creates an array from a shape and row-major data.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::LengthMismatch`] if `data` does not fill `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, ShapeError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShapeError::LengthMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a one-dimensional array.
    #[must_use]
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Creates an array filled with zeros.
    #[must_use]
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Returns the shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of axes.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the flat row-major data.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Consumes the array and returns its data.
    #[must_use]
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the sum of all elements.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Applies `f` element-wise, keeping the shape.
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Cuts the array into blocks of rows along the first axis.
    ///
    /// # Errors
    ///
    /// Returns an error for scalar arrays or ranges outside the first axis.
    pub fn split_rows(&self, ranges: &[Range<usize>]) -> Result<Vec<Self>, ShapeError> {
        let rows = *self.shape.first().ok_or(ShapeError::Scalar)?;
        let row_len = self.row_len();

        ranges
            .iter()
            .map(|range| {
                if range.start > range.end || range.end > rows {
                    return Err(ShapeError::OutOfBounds {
                        start: range.start,
                        end: range.end,
                        rows,
                    });
                }
                let mut shape = self.shape.clone();
                shape[0] = range.len();
                let data = self.data[range.start * row_len..range.end * row_len].to_vec();
                Ok(Self { shape, data })
            })
            .collect()
    }

    /// Joins blocks along the first axis.
    ///
    /// # Errors
    ///
    /// Returns an error if `blocks` is empty, holds scalars, or disagrees on
    /// the trailing axes.
    pub fn concat_rows(blocks: &[Self]) -> Result<Self, ShapeError> {
        let first = blocks.first().ok_or(ShapeError::Scalar)?;
        if first.shape.is_empty() {
            return Err(ShapeError::Scalar);
        }
        let trailing = &first.shape[1..];

        let mut rows = 0;
        let mut data = Vec::with_capacity(blocks.iter().map(Self::len).sum());
        for block in blocks {
            if block.shape.is_empty() || &block.shape[1..] != trailing {
                return Err(ShapeError::Incompatible {
                    left: trailing.to_vec(),
                    right: block.shape.iter().skip(1).copied().collect(),
                });
            }
            rows += block.shape[0];
            data.extend_from_slice(&block.data);
        }

        let mut shape = first.shape.clone();
        shape[0] = rows;
        Ok(Self { shape, data })
    }
}

mod f64_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() % 8 != 0 {
            return Err(serde::de::Error::custom(format!(
                "array byte length {} is not a multiple of 8",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_checks_length() {
        assert!(NdArray::new(vec![2, 3], vec![0.0; 6]).is_ok());
        let err = NdArray::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, ShapeError::LengthMismatch { expected: 6, actual: 5, .. }));
    }

    #[test]
    fn test_split_and_concat_rows() {
        let arr = NdArray::new(vec![5, 2], (0..10).map(f64::from).collect()).unwrap();
        let blocks = arr.split_rows(&[0..2, 2..4, 4..5]).unwrap();

        assert_eq!(blocks[0].shape(), &[2, 2]);
        assert_eq!(blocks[2].data(), &[8.0, 9.0]);

        let joined = NdArray::concat_rows(&blocks).unwrap();
        assert_eq!(joined, arr);
    }

    #[test]
    fn test_split_out_of_bounds() {
        let arr = NdArray::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            arr.split_rows(&[0..3]),
            Err(ShapeError::OutOfBounds { rows: 2, .. })
        ));
    }

    #[test]
    fn test_concat_incompatible() {
        let a = NdArray::zeros(vec![1, 2]);
        let b = NdArray::zeros(vec![1, 3]);
        assert!(matches!(
            NdArray::concat_rows(&[a, b]),
            Err(ShapeError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_serialization_is_bit_exact() {
        let arr = NdArray::new(vec![3], vec![0.1, -2.5e-300, f64::MAX]).unwrap();
        let json = serde_json::to_string(&arr).unwrap();
        let back: NdArray = serde_json::from_str(&json).unwrap();
        assert_eq!(back, arr);
    }

    #[test]
    fn test_sum_and_map() {
        let arr = NdArray::from_vec(vec![1.0, 2.0, 3.0]);
        assert!((arr.sum() - 6.0).abs() < f64::EPSILON);
        assert_eq!(arr.map(|v| v * 2.0).data(), &[2.0, 4.0, 6.0]);
    }
}
