//! The unit-of-work abstraction.
//!
//! A [`Task`] implements one stage. The manager creates a fresh instance from
//! the [`TaskRegistry`] for every attempt and drives it through
//! `setup -> process -> finish`; how many ranks call `process` is decided by
//! the task's [`Capability`].

mod capability;
mod context;
mod guard;
mod registry;

pub use capability::Capability;
pub use context::TaskContext;
pub use guard::TaskGuard;
pub use registry::{TaskFactory, TaskRegistry};

use crate::core::{DataProduct, Payload};
use crate::errors::TaskError;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Stage parameters as handed to [`Task::setup`].
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Resolved inputs, keyed by the stage's input names.
pub type Inputs = BTreeMap<String, Arc<DataProduct>>;

/// Produced payloads, keyed by declared output name.
pub type Outputs = BTreeMap<String, Payload>;

/// Trait for stage implementations.
#[cfg_attr(test, mockall::automock)]
pub trait Task: Send {
    /// Which ranks call [`Task::process`].
    fn capability(&self) -> Capability;

    /// Configures the instance from stage parameters.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Configuration`] for invalid parameters. Such
    /// errors are never retried.
    fn setup(&mut self, _params: &Parameters) -> Result<(), TaskError> {
        Ok(())
    }

    /// Produces the stage's outputs from its inputs.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Retryable`] for transient failures and
    /// [`TaskError::Fatal`] to abort the run.
    fn process(&mut self, ctx: &TaskContext, inputs: &Inputs) -> Result<Outputs, TaskError>;

    /// Releases resources. Called exactly once per instance, whether or not
    /// `process` succeeded.
    fn finish(&mut self) {}
}

impl Debug for dyn Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("capability", &self.capability())
            .finish_non_exhaustive()
    }
}

/// A task backed by a closure.
pub struct FnTask<F>
where
    F: FnMut(&TaskContext, &Inputs) -> Result<Outputs, TaskError> + Send,
{
    capability: Capability,
    func: F,
}

impl<F> FnTask<F>
where
    F: FnMut(&TaskContext, &Inputs) -> Result<Outputs, TaskError> + Send,
{
    /// Creates a closure task with the given capability.
    pub fn new(capability: Capability, func: F) -> Self {
        Self { capability, func }
    }

    /// Creates a closure task run by the root rank only.
    pub fn single(func: F) -> Self {
        Self::new(Capability::SingleRank, func)
    }

    /// Creates a closure task run by every rank.
    pub fn all_ranks(func: F) -> Self {
        Self::new(Capability::AllRanks, func)
    }
}

impl<F> Debug for FnTask<F>
where
    F: FnMut(&TaskContext, &Inputs) -> Result<Outputs, TaskError> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask")
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&TaskContext, &Inputs) -> Result<Outputs, TaskError> + Send,
{
    fn capability(&self) -> Capability {
        self.capability.clone()
    }

    fn process(&mut self, ctx: &TaskContext, inputs: &Inputs) -> Result<Outputs, TaskError> {
        (self.func)(ctx, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::RankContext;
    use serde_json::json;

    #[test]
    fn test_fn_task() {
        let mut task = FnTask::single(|ctx, _inputs| {
            Ok(Outputs::from([("stage".to_string(), Payload::from(json!(ctx.stage())))]))
        });
        assert_eq!(task.capability(), Capability::SingleRank);

        let ctx = TaskContext::new("load", 1, RankContext::serial(), Capability::SingleRank);
        let out = task.process(&ctx, &Inputs::new()).unwrap();
        assert_eq!(out["stage"].as_value(), Some(&json!("load")));
    }

    #[test]
    fn test_default_setup_accepts_anything() {
        let mut task = FnTask::all_ranks(|_, _| Ok(Outputs::new()));
        let params = Parameters::from_iter([("k".to_string(), json!(1))]);
        assert!(task.setup(&params).is_ok());
    }
}
