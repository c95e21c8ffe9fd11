//! Checkpointed run progress.

use crate::core::{Fingerprint, RunPhase, StageStatus};
use crate::utils::{generate_run_id, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Completion record for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage name.
    pub stage: String,
    /// The stage fingerprint the outputs were keyed under.
    pub fingerprint: Fingerprint,
    /// Output name to product fingerprint.
    pub outputs: BTreeMap<String, Fingerprint>,
    /// Number of `process` attempts; zero when served from cache.
    pub attempts: usize,
    /// Whether the outputs came from the cache.
    pub status: StageStatus,
    /// When the stage completed.
    pub completed_at: Timestamp,
}

/// The persisted progress of a pipeline run.
///
/// Owned by the manager for the duration of a run and checkpointed by the
/// root rank after every stage and at run end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Unique id of the run; kept across resumes.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Fingerprint of the plan this state belongs to.
    pub plan_fingerprint: Fingerprint,
    /// Current phase.
    pub phase: RunPhase,
    /// Completed stages in plan order.
    pub stages: Vec<StageRecord>,
    /// Index in the plan of the next stage to run.
    pub next_position: usize,
    /// Last failure message, set when the run aborts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the run first started.
    pub started_at: Timestamp,
    /// When the state last changed.
    pub updated_at: Timestamp,
}

impl RunState {
    /// Creates a fresh state in the `Planning` phase.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, plan_fingerprint: Fingerprint) -> Self {
        let now = now_utc();
        Self {
            run_id: generate_run_id(),
            pipeline: pipeline.into(),
            plan_fingerprint,
            phase: RunPhase::Planning,
            stages: Vec::new(),
            next_position: 0,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Prepares a restored state for another run over the same plan.
    ///
    /// Completed records are kept; the phase returns to `Planning` and the
    /// next position to the start, since completed stages are served from
    /// the cache.
    #[must_use]
    pub fn resumed(mut self) -> Self {
        self.phase = RunPhase::Planning;
        self.next_position = 0;
        self.last_error = None;
        self.updated_at = now_utc();
        self
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    #[must_use]
    pub fn transition(&mut self, next: RunPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            return false;
        }
        self.phase = next;
        self.updated_at = now_utc();
        true
    }

    /// Records a completed stage, replacing any earlier record for it.
    pub fn record_stage(&mut self, record: StageRecord, position: usize) {
        self.stages.retain(|r| r.stage != record.stage);
        self.stages.push(record);
        self.next_position = position + 1;
        self.updated_at = now_utc();
    }

    /// Marks the run aborted with a message.
    pub fn abort(&mut self, message: impl Into<String>) {
        if self.phase != RunPhase::Aborted {
            self.phase = RunPhase::Aborted;
        }
        self.last_error = Some(message.into());
        self.updated_at = now_utc();
    }

    /// Returns the record for `stage`, if it completed.
    #[must_use]
    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Returns true if `stage` has a completion record.
    #[must_use]
    pub fn is_completed(&self, stage: &str) -> bool {
        self.record(stage).is_some()
    }

    /// Number of stages that actually executed (not served from cache).
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.stages.iter().filter(|r| r.status == StageStatus::Executed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(stage: &str, status: StageStatus) -> StageRecord {
        let fp = Fingerprint::of_bytes(stage.as_bytes());
        StageRecord {
            stage: stage.to_string(),
            outputs: BTreeMap::from([("out".to_string(), fp.for_output("out"))]),
            fingerprint: fp,
            attempts: usize::from(status == StageStatus::Executed),
            status,
            completed_at: now_utc(),
        }
    }

    #[test]
    fn test_new_state() {
        let state = RunState::new("p", Fingerprint::of_bytes(b"plan"));
        assert_eq!(state.phase, RunPhase::Planning);
        assert!(state.stages.is_empty());
        assert_eq!(state.next_position, 0);
    }

    #[test]
    fn test_transitions() {
        let mut state = RunState::new("p", Fingerprint::of_bytes(b"plan"));
        assert!(!state.transition(RunPhase::Completed));
        assert!(state.transition(RunPhase::Running));
        assert!(state.transition(RunPhase::Completed));
        assert!(!state.transition(RunPhase::Running));
    }

    #[test]
    fn test_record_stage_replaces() {
        let mut state = RunState::new("p", Fingerprint::of_bytes(b"plan"));
        state.record_stage(record("a", StageStatus::Executed), 0);
        state.record_stage(record("a", StageStatus::Cached), 0);
        state.record_stage(record("b", StageStatus::Executed), 1);

        assert_eq!(state.stages.len(), 2);
        assert_eq!(state.next_position, 2);
        assert_eq!(state.executed_count(), 1);
        assert!(state.is_completed("a"));
        assert!(!state.is_completed("c"));
    }

    #[test]
    fn test_resumed_keeps_identity() {
        let mut state = RunState::new("p", Fingerprint::of_bytes(b"plan"));
        state.record_stage(record("a", StageStatus::Executed), 0);
        state.abort("boom");
        let run_id = state.run_id;

        let resumed = state.resumed();
        assert_eq!(resumed.run_id, run_id);
        assert_eq!(resumed.phase, RunPhase::Planning);
        assert_eq!(resumed.last_error, None);
        assert!(resumed.is_completed("a"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut state = RunState::new("p", Fingerprint::of_bytes(b"plan"));
        state.record_stage(record("a", StageStatus::Executed), 0);
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
