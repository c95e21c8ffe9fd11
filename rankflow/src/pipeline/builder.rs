//! Pipeline builder with validation.

use super::{DependencyGraph, ExecutionPlan, StageSpec};
use crate::config::{ManagerConfig, PipelineConfig};
use crate::errors::{ConfigurationError, ContractErrorInfo, PlanError};

/// Builder for assembling a pipeline stage by stage.
///
/// Each stage is validated as it is added, so misspelled names and duplicate
/// outputs surface at the call that introduced them. Input bindings may
/// refer to stages added later; they are resolved by [`PipelineBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid, reuses a stage name, or
    /// declares an output another stage already declares.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, ConfigurationError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Adds a stage in place.
    ///
    /// # Errors
    ///
    /// See [`PipelineBuilder::stage`].
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), ConfigurationError> {
        spec.validate()?;

        if self.stages.iter().any(|s| s.name == spec.name) {
            return Err(ConfigurationError::new(format!("Duplicate stage name '{}'", spec.name))
                .with_stages(vec![spec.name.clone()])
                .with_hint("Stage names must be unique within a pipeline."));
        }

        for output in &spec.outputs {
            if let Some(other) = self.producer_of(output) {
                return Err(ConfigurationError::new(format!(
                    "Output '{output}' is declared by both '{other}' and '{}'",
                    spec.name
                ))
                .with_stages(vec![other.to_string(), spec.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new("PLAN-003-CONFIG", format!("Output '{output}' has two producers"))
                        .with_fix_hint("Rename one of the outputs; every output needs exactly one producer.")
                        .with_context_entry("output", output.clone()),
                ));
            }
        }

        self.stages.push(spec);
        Ok(())
    }

    /// Composes this builder with another.
    ///
    /// A stage present in both must be defined identically in both.
    ///
    /// # Errors
    ///
    /// Returns an error if the two define a stage differently or otherwise
    /// conflict.
    pub fn compose(mut self, other: Self) -> Result<Self, ConfigurationError> {
        self.name = format!("{}_{}", self.name, other.name);

        for spec in other.stages {
            match self.stages.iter().find(|s| s.name == spec.name) {
                Some(existing) if existing == &spec => {}
                Some(_) => {
                    return Err(ConfigurationError::new(format!(
                        "Conflicting stage definitions for '{}'",
                        spec.name
                    ))
                    .with_stages(vec![spec.name.clone()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "PLAN-003-CONFIG",
                            format!("Stage '{}' has different definitions in composed pipelines", spec.name),
                        )
                        .with_fix_hint("Rename one of the stages or ensure they have identical configurations."),
                    ));
                }
                None => self.add_stage(spec)?,
            }
        }

        Ok(self)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// The stages added so far, in insertion order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    fn producer_of(&self, output: &str) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| s.outputs.iter().any(|o| o == output))
            .map(|s| s.name.as_str())
    }

    /// Resolves the stages into an execution plan.
    ///
    /// # Errors
    ///
    /// Returns an error for unresolved inputs or a cycle.
    pub fn build(&self) -> Result<ExecutionPlan, PlanError> {
        DependencyGraph::new(self.stages.clone()).build()
    }

    /// Bundles the stages with manager settings, naming the pipeline after
    /// this builder.
    #[must_use]
    pub fn into_config(self, manager: ManagerConfig) -> PipelineConfig {
        PipelineConfig::new(manager.with_pipeline(self.name), self.stages)
    }
}
