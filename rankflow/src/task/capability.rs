//! Which ranks execute a task.

use crate::errors::TaskError;
use crate::rank::ROOT;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution semantics of a task across the rank group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Only the root rank runs `process`; its outcome is broadcast.
    SingleRank,
    /// Every rank runs `process` and may use collectives.
    AllRanks,
    /// Only the listed ranks run `process`, without collectives; the lowest
    /// listed rank's outputs are broadcast.
    RankSubset(Vec<usize>),
}

impl Capability {
    /// Returns true if `rank` calls `process`.
    #[must_use]
    pub fn participates(&self, rank: usize) -> bool {
        match self {
            Self::SingleRank => rank == ROOT,
            Self::AllRanks => true,
            Self::RankSubset(ranks) => ranks.contains(&rank),
        }
    }

    /// The rank whose outputs every rank adopts.
    #[must_use]
    pub fn lead_rank(&self) -> usize {
        match self {
            Self::SingleRank | Self::AllRanks => ROOT,
            Self::RankSubset(ranks) => ranks.iter().copied().min().unwrap_or(ROOT),
        }
    }

    /// Returns true if `process` may call collectives.
    #[must_use]
    pub fn allows_collectives(&self) -> bool {
        matches!(self, Self::AllRanks)
    }

    /// Checks the capability against a group of `size` ranks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Configuration`] for an empty subset or a rank
    /// outside the group.
    pub fn validate(&self, size: usize) -> Result<(), TaskError> {
        if let Self::RankSubset(ranks) = self {
            if ranks.is_empty() {
                return Err(TaskError::configuration("rank subset is empty"));
            }
            if let Some(bad) = ranks.iter().find(|&&r| r >= size) {
                return Err(TaskError::configuration(format!(
                    "rank subset names rank {bad} but the group has {size} ranks"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleRank => write!(f, "single_rank"),
            Self::AllRanks => write!(f, "all_ranks"),
            Self::RankSubset(ranks) => write!(f, "rank_subset{ranks:?}"),
        }
    }
}
