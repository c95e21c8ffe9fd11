//! Stage specifications.

use crate::core::{Fingerprint, FINGERPRINT_FORMAT_VERSION};
use crate::errors::ConfigurationError;
use crate::task::Parameters;
use crate::utils::{first_invalid, NAME_PATTERN};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Specification for a single stage in a pipeline.
///
/// `inputs` maps the stage's own input names to output names declared by
/// other stages; data flow, not explicit dependencies, orders the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The registry name of the task implementing the stage.
    pub task_type: String,
    /// Task parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Input name to the output name it is bound to.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Declared output names.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Overrides the manager's default retry limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<usize>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            parameters: Parameters::new(),
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            max_retries: None,
        }
    }

    /// Sets one parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replaces all parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Binds an input to another stage's output.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.inputs.insert(input.into(), output.into());
        self
    }

    /// Binds an input to the output of the same name.
    #[must_use]
    pub fn consumes(self, output: impl Into<String>) -> Self {
        let output = output.into();
        self.with_input(output.clone(), output)
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    /// Declares several outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs.extend(outputs.into_iter().map(Into::into));
        self
    }

    /// Sets the per-stage retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Validates the specification in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names, a stage without outputs, or an
    /// output declared twice.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let names = std::iter::once(self.name.as_str())
            .chain(self.inputs.keys().map(String::as_str))
            .chain(self.inputs.values().map(String::as_str))
            .chain(self.outputs.iter().map(String::as_str));
        if let Some(bad) = first_invalid(names) {
            return Err(self.error(format!("Stage '{}' uses invalid name '{bad}'", self.name))
                .with_hint(format!("Names must match {NAME_PATTERN}")));
        }

        if self.task_type.trim().is_empty() {
            return Err(self.error(format!("Stage '{}' has no task type", self.name)));
        }

        if self.outputs.is_empty() {
            return Err(self
                .error(format!("Stage '{}' declares no outputs", self.name))
                .with_hint("Every stage must declare at least one output."));
        }

        let mut seen = BTreeSet::new();
        if let Some(dup) = self.outputs.iter().find(|o| !seen.insert(o.as_str())) {
            return Err(self.error(format!("Stage '{}' declares output '{dup}' twice", self.name)));
        }

        Ok(())
    }

    fn error(&self, message: String) -> ConfigurationError {
        ConfigurationError::new(message).with_stages(vec![self.name.clone()])
    }

    /// The retry limit for this stage given the manager default.
    #[must_use]
    pub fn retries(&self, default: usize) -> usize {
        self.max_retries.unwrap_or(default)
    }

    /// Computes the stage fingerprint from its configuration and the
    /// fingerprints of the products bound to its inputs.
    ///
    /// The retry limit does not participate: it changes how a stage runs,
    /// not what it produces.
    #[must_use]
    pub fn fingerprint(&self, inputs: &BTreeMap<String, Fingerprint>) -> Fingerprint {
        let mut outputs: Vec<&str> = self.outputs.iter().map(String::as_str).collect();
        outputs.sort_unstable();

        Fingerprint::of_value(&json!({
            "version": FINGERPRINT_FORMAT_VERSION,
            "stage": self.name,
            "task_type": self.task_type,
            "parameters": Value::Object(self.parameters.clone()),
            "inputs": inputs,
            "outputs": outputs,
        }))
    }

    /// Derives the fingerprint of every declared output.
    #[must_use]
    pub fn output_fingerprints(&self, stage_fingerprint: &Fingerprint) -> BTreeMap<String, Fingerprint> {
        self.outputs
            .iter()
            .map(|o| (o.clone(), stage_fingerprint.for_output(o)))
            .collect()
    }
}
