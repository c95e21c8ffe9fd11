//! Configuration types for the pipeline manager.

use crate::errors::{ConfigurationError, PlanError};
use crate::pipeline::{DependencyGraph, ExecutionPlan, RetryConfig, StageSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Overrides the cache directory.
pub const ENV_CACHE_DIR: &str = "RANKFLOW_CACHE_DIR";
/// Overrides the default retry limit.
pub const ENV_MAX_RETRIES: &str = "RANKFLOW_MAX_RETRIES";
/// Overrides the resume flag (`true`/`false`/`1`/`0`).
pub const ENV_RESUME: &str = "RANKFLOW_RESUME";

/// Settings for a [`PipelineManager`](crate::pipeline::PipelineManager).
///
/// Every rank must be given identical settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Pipeline name; names the checkpoint file.
    #[serde(default = "default_pipeline")]
    pub pipeline: String,
    /// Root of the product cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Retries after the first attempt, unless a stage overrides it.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Delay between attempts.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Whether to restore the last checkpoint for this pipeline.
    #[serde(default = "default_true")]
    pub resume: bool,
    /// Whether ranks agree on the plan fingerprint before running.
    #[serde(default = "default_true")]
    pub verify_plan: bool,
}

fn default_pipeline() -> String {
    "pipeline".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".rankflow-cache")
}

fn default_max_retries() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pipeline: default_pipeline(),
            cache_dir: default_cache_dir(),
            max_retries: default_max_retries(),
            retry: RetryConfig::default(),
            resume: true,
            verify_plan: true,
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `RANKFLOW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlays values supplied by `lookup` for the `RANKFLOW_*` keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|d| !d.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.max_retries = raw.trim().parse().map_err(|_| {
                ConfigurationError::new(format!("{ENV_MAX_RETRIES} must be a non-negative integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup(ENV_RESUME) {
            self.resume = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigurationError::new(format!(
                        "{ENV_RESUME} must be a boolean, got '{raw}'"
                    )))
                }
            };
        }
        Ok(self)
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipeline = name.into();
        self
    }

    /// Sets the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Sets the default retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the retry delay configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables resuming from a checkpoint.
    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Enables or disables plan agreement.
    #[must_use]
    pub fn with_verify_plan(mut self, verify: bool) -> Self {
        self.verify_plan = verify;
        self
    }
}

/// Manager settings together with the stage list, as an external loader
/// would produce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Manager settings.
    #[serde(flatten)]
    pub manager: ManagerConfig,
    /// Stage specifications in declaration order.
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl PipelineConfig {
    /// Creates a configuration from its parts.
    #[must_use]
    pub fn new(manager: ManagerConfig, stages: Vec<StageSpec>) -> Self {
        Self { manager, stages }
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not describe a pipeline.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::new(format!("Invalid pipeline configuration: {e}")))
    }

    /// Builds the execution plan for the stages.
    ///
    /// # Errors
    ///
    /// Returns the plan error if the stages do not form a valid plan.
    pub fn plan(&self) -> Result<ExecutionPlan, PlanError> {
        DependencyGraph::new(self.stages.clone()).build()
    }
}
