//! # Rankflow
//!
//! A distributed pipeline execution engine for scientific data processing.
//!
//! Rankflow runs the same pipeline on every rank of a process group:
//!
//! - **Data-flow planning**: stages declare named outputs and bind their
//!   inputs to other stages' outputs; the engine derives a deterministic plan
//! - **Rank collectives**: broadcast, gather, all-gather, all-reduce and
//!   scatter over a pluggable [`rank::Communicator`]
//! - **Capabilities**: a task runs on one rank, a subset, or all ranks
//! - **Fingerprinted cache**: products are keyed by a hash of everything
//!   that determines them, so re-runs skip completed work
//! - **Coordinated failure**: retries are decided collectively and a fatal
//!   error on any rank aborts every rank
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rankflow::prelude::*;
//!
//! let registry = TaskRegistry::new()
//!     .with_task("load", LoadVisibilities::default)
//!     .with_task("flag", FlagRfi::default);
//!
//! let stages = vec![
//!     StageSpec::new("load", "load").with_output("vis"),
//!     StageSpec::new("flag", "flag").consumes("vis").with_output("mask"),
//! ];
//!
//! // One manager per rank, each handed its rank's context.
//! let manager = PipelineManager::new(ManagerConfig::from_env()?, registry, ranks);
//! let products = manager.run(stages).into_result()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod rank;
pub mod task;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::ProductCache;
    pub use crate::config::{ManagerConfig, PipelineConfig};
    pub use crate::core::{DataProduct, Fingerprint, NdArray, Payload, RunPhase, StageStatus};
    pub use crate::errors::{
        CacheError, CollectiveFailure, ConfigurationError, CycleError, ErrorKind, PipelineError, PlanError,
        StageFailure, TaskError, UnresolvedInputError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        DependencyGraph, ExecutionPlan, PipelineBuilder, PipelineManager, RetryConfig, RunReport, StageSpec,
    };
    pub use crate::rank::{Communicator, LocalGroup, RankContext, ReduceOp, SerialCommunicator};
    pub use crate::task::{Capability, FnTask, Inputs, Outputs, Parameters, Task, TaskContext, TaskRegistry};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
