//! Observability utilities.
//!
//! The engine logs through `tracing` macros only; installing a subscriber is
//! left to the embedding binary, which may use [`init_tracing`].

mod logging;

pub use logging::{init_tracing, LogFormat, SpanTimer, DEFAULT_FILTER};
