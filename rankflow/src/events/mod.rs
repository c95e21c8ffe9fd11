//! Run lifecycle events.
//!
//! The manager reports run and stage transitions to an [`EventSink`] in
//! addition to its tracing output, so embedding applications and tests can
//! observe a run without parsing logs.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run passed planning and started executing stages.
pub const RUN_STARTED: &str = "run.started";
/// Every stage completed.
pub const RUN_COMPLETED: &str = "run.completed";
/// The run stopped on an error.
pub const RUN_ABORTED: &str = "run.aborted";
/// A stage missed the cache and is about to execute.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage's outputs were served from the cache.
pub const STAGE_CACHED: &str = "stage.cached";
/// A stage executed and published its outputs.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage attempt failed and will be retried.
pub const STAGE_RETRY: &str = "stage.retry";
/// A stage failed for good.
pub const STAGE_FAILED: &str = "stage.failed";
