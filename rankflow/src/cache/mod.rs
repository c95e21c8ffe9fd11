//! Content-addressed product cache and run checkpoints.
//!
//! Products are keyed by their fingerprint alone, so any run (or operator)
//! can locate an artifact without consulting the run that produced it.

mod record;
mod store;

pub use record::{ProductRecord, RECORD_FORMAT_VERSION};
pub use store::ProductCache;
