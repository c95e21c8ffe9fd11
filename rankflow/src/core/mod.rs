//! Core domain model types for rankflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Numeric array and structured payloads
//! - Fingerprinted data products
//! - Run phase and stage status enums

mod array;
mod fingerprint;
mod product;
mod status;

pub use array::{NdArray, ShapeError};
pub use fingerprint::{hash_parameters, to_canonical_json, Fingerprint, FINGERPRINT_FORMAT_VERSION};
pub use product::{DataProduct, Payload};
pub use status::{RunPhase, StageStatus};
