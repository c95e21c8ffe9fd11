//! Parallel rank groups and collective operations.
//!
//! This module provides:
//! - The [`Communicator`] substrate trait with serial and in-process
//!   implementations
//! - [`RankContext`], the collective API stages and the manager use
//! - Block partitioning helpers for distributing an axis over ranks

mod communicator;
mod context;
mod local;
pub mod partition;

pub use communicator::{Communicator, SerialCommunicator};
pub use context::{RankContext, ReduceOp, ROOT};
pub use local::{LocalCommunicator, LocalGroup};
