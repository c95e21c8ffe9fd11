//! Run phase and stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The phase of a pipeline run.
///
/// `Planning -> Running -> {Completed, Aborted}`; a planning failure goes
/// straight to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Building and agreeing on the execution plan.
    #[default]
    Planning,
    /// Executing stages in plan order.
    Running,
    /// Every stage produced all declared outputs.
    Completed,
    /// The run stopped on an unrecoverable error.
    Aborted,
}

impl RunPhase {
    /// Returns true if the phase is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns true if a move to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Planning, Self::Running | Self::Aborted) | (Self::Running, Self::Completed | Self::Aborted)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// How a stage's outputs were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The task ran and its outputs were published.
    Executed,
    /// Every output was served from the product cache.
    Cached,
    /// The stage did not complete.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed => write!(f, "executed"),
            Self::Cached => write!(f, "cached"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_phase_transitions() {
        assert!(RunPhase::Planning.can_transition_to(RunPhase::Running));
        assert!(RunPhase::Planning.can_transition_to(RunPhase::Aborted));
        assert!(!RunPhase::Planning.can_transition_to(RunPhase::Completed));
        assert!(RunPhase::Running.can_transition_to(RunPhase::Completed));
        assert!(!RunPhase::Completed.can_transition_to(RunPhase::Running));
        assert!(!RunPhase::Aborted.can_transition_to(RunPhase::Running));
    }

    #[test]
    fn test_run_phase_is_terminal() {
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Aborted.is_terminal());
        assert!(!RunPhase::Running.is_terminal());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Cached).unwrap();
        assert_eq!(json, r#""cached""#);
        assert_eq!(RunPhase::Aborted.to_string(), "aborted");
    }
}
