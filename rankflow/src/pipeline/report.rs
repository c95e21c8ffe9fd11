//! The outcome of a pipeline run on one rank.

use crate::core::{DataProduct, Fingerprint, RunPhase, StageStatus};
use crate::errors::{ErrorKind, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// What happened to one stage during this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    /// The stage name.
    pub stage: String,
    /// Whether it executed, was served from cache, or failed.
    pub status: StageStatus,
    /// Number of `process` attempts made.
    pub attempts: usize,
    /// The stage fingerprint, when it was computed.
    pub fingerprint: Option<Fingerprint>,
}

/// Why a run aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortInfo {
    /// The stage the failure is attributed to.
    pub stage: Option<String>,
    /// The error classification.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
    /// Whether a re-run can reuse work from this one.
    pub resumable: bool,
}

/// The result of [`PipelineManager::run`](super::PipelineManager::run) on
/// one rank.
#[derive(Debug)]
pub struct RunReport {
    /// The run id, identical on every rank once planning succeeded.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// The reporting rank.
    pub rank: usize,
    /// Terminal phase: `Completed` or `Aborted`.
    pub phase: RunPhase,
    /// Per-stage summaries in plan order, for stages reached by this run.
    pub stages: Vec<StageSummary>,
    /// Every product available at the end of the run, keyed by output name.
    pub products: BTreeMap<String, Arc<DataProduct>>,
    /// Set when the run aborted.
    pub abort: Option<AbortInfo>,
    error: Option<PipelineError>,
}

impl RunReport {
    pub(crate) fn completed(
        run_id: Uuid,
        pipeline: String,
        rank: usize,
        stages: Vec<StageSummary>,
        products: BTreeMap<String, Arc<DataProduct>>,
    ) -> Self {
        Self {
            run_id,
            pipeline,
            rank,
            phase: RunPhase::Completed,
            stages,
            products,
            abort: None,
            error: None,
        }
    }

    pub(crate) fn aborted(
        run_id: Uuid,
        pipeline: String,
        rank: usize,
        stages: Vec<StageSummary>,
        products: BTreeMap<String, Arc<DataProduct>>,
        error: PipelineError,
        resumable: bool,
    ) -> Self {
        let abort = AbortInfo {
            stage: error.stage().map(str::to_string),
            kind: error.kind(),
            message: error.to_string(),
            resumable,
        };
        Self {
            run_id,
            pipeline,
            rank,
            phase: RunPhase::Aborted,
            stages,
            products,
            abort: Some(abort),
            error: Some(error),
        }
    }

    /// Attributes the abort to `stage` when the error itself names none, as
    /// for a collective that failed on this rank mid-stage.
    pub(crate) fn at_stage(mut self, stage: &str) -> Self {
        if let Some(abort) = self.abort.as_mut() {
            abort.stage.get_or_insert_with(|| stage.to_string());
        }
        self
    }

    /// Returns true if every stage produced all declared outputs.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.phase == RunPhase::Completed
    }

    /// The error that aborted the run.
    #[must_use]
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// Looks up a product by output name.
    #[must_use]
    pub fn product(&self, name: &str) -> Option<&Arc<DataProduct>> {
        self.products.get(name)
    }

    /// Names of stages whose task ran during this run.
    #[must_use]
    pub fn executed_stages(&self) -> Vec<&str> {
        self.stages_with(StageStatus::Executed)
    }

    /// Names of stages served entirely from the cache.
    #[must_use]
    pub fn cached_stages(&self) -> Vec<&str> {
        self.stages_with(StageStatus::Cached)
    }

    fn stages_with(&self, status: StageStatus) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.stage.as_str())
            .collect()
    }

    /// Process exit status: 0 when completed, otherwise per error kind.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.abort.as_ref().map_or(0, |a| a.kind.exit_code())
    }

    /// Converts the report into the products or the aborting error.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the run.
    pub fn into_result(self) -> Result<BTreeMap<String, Arc<DataProduct>>, PipelineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.products),
        }
    }
}
