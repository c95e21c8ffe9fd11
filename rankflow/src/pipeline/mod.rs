//! Pipeline planning and execution.
//!
//! This module provides:
//! - Stage specifications and their fingerprints
//! - Dependency resolution into a deterministic execution plan
//! - Retry policy for failing tasks
//! - The per-rank pipeline manager, its checkpointed state and run report

mod builder;
mod graph;
mod manager;
mod report;
mod retry;
mod spec;
mod state;


pub use builder::PipelineBuilder;
pub use graph::{DependencyGraph, ExecutionPlan};
pub use manager::PipelineManager;
pub use report::{AbortInfo, RunReport, StageSummary};
pub use retry::{
    should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState,
};
pub use spec::StageSpec;
pub use state::{RunState, StageRecord};
