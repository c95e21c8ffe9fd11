//! Utility functions for run ids, timestamps and name validation.

pub mod timestamps;
mod uuid_utils;
mod validation;

pub use timestamps::{elapsed_ms, format_timestamp, iso_timestamp, now_utc, Timestamp};
pub use uuid_utils::{generate_run_id, generate_uuid_v7};
pub use validation::{first_invalid, is_valid_name, NAME_PATTERN};
