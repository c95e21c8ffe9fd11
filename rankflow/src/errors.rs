//! Error types for the rankflow engine.
//!
//! Every failure a run can end with is classified by an [`ErrorKind`] so the
//! launching process can report the cause uniformly on every rank. Plan
//! construction errors carry [`ContractErrorInfo`] diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Classification of run-ending failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad stage specification, unknown task type or invalid parameters.
    Configuration,
    /// The stage dependency graph contains a cycle.
    Cycle,
    /// An input binding names an output nobody produces.
    UnresolvedInput,
    /// A recoverable task error survived every retry.
    Task,
    /// A task declared an unrecoverable condition.
    FatalTask,
    /// A peer rank failed during (or before) a collective.
    CollectiveFailure,
    /// A cached artifact failed integrity verification.
    CacheCorruption,
    /// The product cache could not be written or read.
    Storage,
}

impl ErrorKind {
    /// Process exit status associated with this kind.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Configuration | Self::Cycle | Self::UnresolvedInput => 2,
            Self::Task => 3,
            Self::FatalTask => 4,
            Self::CollectiveFailure => 5,
            Self::CacheCorruption | Self::Storage => 6,
        }
    }

    /// Returns true for failures detected before any stage ran.
    #[must_use]
    pub fn is_plan_error(self) -> bool {
        matches!(self, Self::Configuration | Self::Cycle | Self::UnresolvedInput)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration_error",
            Self::Cycle => "cycle_error",
            Self::UnresolvedInput => "unresolved_input_error",
            Self::Task => "task_error",
            Self::FatalTask => "fatal_task_error",
            Self::CollectiveFailure => "collective_failure",
            Self::CacheCorruption => "cache_corruption_error",
            Self::Storage => "storage_error",
        };
        f.write_str(s)
    }
}

/// Metadata about a plan error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PLAN-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised for an invalid stage specification or plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Attaches the generic `PLAN-003-CONFIG` code with a fix hint.
    #[must_use]
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        let info = ContractErrorInfo::new("PLAN-003-CONFIG", self.message.clone()).with_fix_hint(hint);
        self.with_error_info(info)
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "PLAN-001-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the input bindings in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Error raised when an input binding names an output no stage declares.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage '{stage}' input '{input}' is bound to '{output}', which no stage produces")]
pub struct UnresolvedInputError {
    /// The consuming stage.
    pub stage: String,
    /// The input name on the consuming stage.
    pub input: String,
    /// The output name that could not be resolved.
    pub output: String,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl UnresolvedInputError {
    /// Creates a new unresolved input error.
    #[must_use]
    pub fn new(stage: impl Into<String>, input: impl Into<String>, output: impl Into<String>) -> Self {
        let stage = stage.into();
        let output = output.into();
        let info = ContractErrorInfo::new(
            "PLAN-002-UNRESOLVED",
            format!("Output '{output}' not declared by any stage"),
        )
        .with_fix_hint("Check the binding for typos or add the stage that produces this output.")
        .with_context_entry("stage", stage.clone());

        Self {
            stage,
            input: input.into(),
            output,
            error_info: info,
        }
    }
}

/// Any plan construction failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Invalid stage specifications.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
    /// A dependency cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),
    /// A binding without producer.
    #[error("{0}")]
    UnresolvedInput(#[from] UnresolvedInputError),
}

impl PlanError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Cycle(_) => ErrorKind::Cycle,
            Self::UnresolvedInput(_) => ErrorKind::UnresolvedInput,
        }
    }
}

/// Errors returned by task implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Parameters handed to `setup` are invalid. Never retried.
    #[error("invalid task configuration: {0}")]
    Configuration(String),
    /// A transient failure; the stage is retried up to its limit.
    #[error("{0}")]
    Retryable(String),
    /// An unrecoverable condition; the whole run aborts.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TaskError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a retryable error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if the stage may be re-attempted.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Retryable(_) => ErrorKind::Task,
            Self::Fatal(_) => ErrorKind::FatalTask,
        }
    }
}

/// Failure of a single stage, as agreed by every rank.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Stage '{stage}' failed after {attempts} attempt(s) ({kind}): {message}")]
pub struct StageFailure {
    /// The failing stage.
    pub stage: String,
    /// The error classification.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
    /// Number of `process` invocations made.
    pub attempts: usize,
}

impl StageFailure {
    /// Creates a stage failure from a task error.
    #[must_use]
    pub fn from_task_error(stage: impl Into<String>, error: &TaskError, attempts: usize) -> Self {
        Self {
            stage: stage.into(),
            kind: error.kind(),
            message: error.to_string(),
            attempts,
        }
    }
}

/// Out-of-band notice a failing rank publishes before aborting collectives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    /// The rank that failed.
    pub rank: usize,
    /// The stage being executed, if any.
    pub stage: Option<String>,
    /// What went wrong on that rank.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
}

impl fmt::Display for FailureNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "rank {} failed in stage '{}' ({}): {}", self.rank, stage, self.kind, self.message),
            None => write!(f, "rank {} failed ({}): {}", self.rank, self.kind, self.message),
        }
    }
}

/// Raised on a rank that observed a peer failure during a collective.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Collective failure observed on rank {rank}: {message}")]
pub struct CollectiveFailure {
    /// The observing rank.
    pub rank: usize,
    /// Description of what was observed.
    pub message: String,
    /// The originating notice, when the failing peer published one.
    pub notice: Option<FailureNotice>,
}

impl CollectiveFailure {
    /// Creates a collective failure without an originating notice.
    #[must_use]
    pub fn new(rank: usize, message: impl Into<String>) -> Self {
        Self {
            rank,
            message: message.into(),
            notice: None,
        }
    }

    /// Creates a collective failure from a peer's notice.
    #[must_use]
    pub fn from_notice(rank: usize, notice: FailureNotice) -> Self {
        Self {
            rank,
            message: notice.to_string(),
            notice: Some(notice),
        }
    }
}

/// Errors raised by a [`Communicator`](crate::rank::Communicator) substrate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommError {
    /// The group was aborted by a participant.
    #[error("communicator aborted: {0}")]
    Aborted(FailureNotice),
    /// The transport itself failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A cached artifact failed integrity or fingerprint verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cached artifact {fingerprint} is corrupt: {reason}")]
pub struct CacheCorruptionError {
    /// The fingerprint that was requested.
    pub fingerprint: String,
    /// What failed to verify.
    pub reason: String,
}

impl CacheCorruptionError {
    /// Creates a new corruption error.
    #[must_use]
    pub fn new(fingerprint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the product cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No artifact exists for the fingerprint.
    #[error("No cached artifact for fingerprint {0}")]
    NotFound(String),
    /// The pipeline name cannot be used as a checkpoint file name.
    #[error("Invalid pipeline name '{0}'")]
    InvalidPipelineName(String),
    /// The artifact exists but failed verification.
    #[error("{0}")]
    Corrupted(#[from] CacheCorruptionError),
    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tempfile::PersistError> for CacheError {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}

impl CacheError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Corrupted(_) => ErrorKind::CacheCorruption,
            Self::InvalidPipelineName(_) => ErrorKind::Configuration,
            Self::NotFound(_) | Self::Serialization(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }
}

/// The main error type for rankflow runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A cycle in the stage graph.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// An unresolved input binding.
    #[error("{0}")]
    UnresolvedInput(#[from] UnresolvedInputError),

    /// A stage failed on this or another rank.
    #[error("{0}")]
    Stage(#[from] StageFailure),

    /// A peer failure observed through a collective.
    #[error("{0}")]
    Collective(#[from] CollectiveFailure),

    /// The product cache failed.
    #[error("{0}")]
    Cache(#[from] CacheError),
}

impl From<PlanError> for PipelineError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Configuration(e) => Self::Configuration(e),
            PlanError::Cycle(e) => Self::Cycle(e),
            PlanError::UnresolvedInput(e) => Self::UnresolvedInput(e),
        }
    }
}

impl PipelineError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Cycle(_) => ErrorKind::Cycle,
            Self::UnresolvedInput(_) => ErrorKind::UnresolvedInput,
            Self::Stage(e) => e.kind,
            Self::Collective(_) => ErrorKind::CollectiveFailure,
            Self::Cache(e) => e.kind(),
        }
    }

    /// Returns the stage the error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage(e) => Some(&e.stage),
            Self::Collective(e) => e.notice.as_ref().and_then(|n| n.stage.as_deref()),
            Self::UnresolvedInput(e) => Some(&e.stage),
            Self::Configuration(e) => e.stages.first().map(String::as_str),
            Self::Cycle(_) | Self::Cache(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_cycle_error_display() {
        let err = CycleError::new(vec!["a".into(), "b".into(), "c".into(), "a".into()]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, "PLAN-001-CYCLE");
    }

    #[test]
    fn test_unresolved_input_error() {
        let err = UnresolvedInputError::new("mask", "data", "sstream");
        assert_eq!(err.error_info.code, "PLAN-002-UNRESOLVED");
        assert!(err.to_string().contains("'sstream'"));
    }

    #[test]
    fn test_task_error_kinds() {
        assert_eq!(TaskError::retryable("x").kind(), ErrorKind::Task);
        assert_eq!(TaskError::fatal("x").kind(), ErrorKind::FatalTask);
        assert_eq!(TaskError::configuration("x").kind(), ErrorKind::Configuration);
        assert!(TaskError::retryable("x").is_retryable());
        assert!(!TaskError::fatal("x").is_retryable());
    }

    #[test]
    fn test_pipeline_error_kind_and_stage() {
        let failure = StageFailure::from_task_error("b", &TaskError::fatal("boom"), 1);
        let err = PipelineError::from(failure);
        assert_eq!(err.kind(), ErrorKind::FatalTask);
        assert_eq!(err.stage(), Some("b"));
        assert_eq!(err.kind().exit_code(), 4);
    }

    #[test]
    fn test_collective_failure_carries_notice() {
        let notice = FailureNotice {
            rank: 2,
            stage: Some("grid".into()),
            kind: ErrorKind::FatalTask,
            message: "bad input".into(),
        };
        let err = PipelineError::from(CollectiveFailure::from_notice(0, notice));
        assert_eq!(err.kind(), ErrorKind::CollectiveFailure);
        assert_eq!(err.stage(), Some("grid"));
        assert!(err.to_string().contains("rank 2 failed in stage 'grid'"));
    }

    #[test]
    fn test_error_kind_serialize() {
        let json = serde_json::to_string(&ErrorKind::FatalTask).unwrap();
        assert_eq!(json, r#""fatal_task""#);
        assert!(ErrorKind::Cycle.is_plan_error());
        assert!(!ErrorKind::Task.is_plan_error());
    }
}
