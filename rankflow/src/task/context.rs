//! Per-attempt context handed to [`Task::process`](super::Task::process).

use super::Capability;
use crate::rank::RankContext;

/// What a running task may know about its invocation.
///
/// Rank identity is always available. The collective API is exposed only to
/// [`Capability::AllRanks`] tasks, since any other task runs on a subset of
/// ranks and a collective there would never complete.
#[derive(Debug, Clone)]
pub struct TaskContext {
    stage: String,
    attempt: usize,
    ranks: RankContext,
    capability: Capability,
}

impl TaskContext {
    /// Creates a context for one attempt of `stage`.
    #[must_use]
    pub fn new(stage: impl Into<String>, attempt: usize, ranks: RankContext, capability: Capability) -> Self {
        Self {
            stage: stage.into(),
            attempt,
            ranks,
            capability,
        }
    }

    /// The stage being executed.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// This rank's number.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.ranks.rank()
    }

    /// The rank group size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.ranks.size()
    }

    /// The collective API, for tasks that run on every rank.
    #[must_use]
    pub fn collectives(&self) -> Option<&RankContext> {
        self.capability.allows_collectives().then_some(&self.ranks)
    }
}
