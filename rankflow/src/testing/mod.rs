//! Testing utilities for rankflow pipelines.
//!
//! This module provides:
//! - Mock tasks reporting to a shared call log
//! - A scratch-directory pipeline harness for serial and multi-rank runs

mod fixtures;
mod mocks;

pub use fixtures::TestPipeline;
pub use mocks::{CallLog, ConstantTask, FatalTask, FlakyTask, PartitionedSumTask, RejectingTask};
