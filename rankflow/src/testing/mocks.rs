//! Mock tasks for testing.
//!
//! The manager creates a fresh task instance per attempt, so every mock
//! reports to a shared [`CallLog`] rather than to its own fields.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::core::{NdArray, Payload};
use crate::errors::TaskError;
use crate::rank::ReduceOp;
use crate::task::{Capability, Inputs, Outputs, Parameters, Task, TaskContext};

#[derive(Debug, Default)]
struct Calls {
    setup: usize,
    process: usize,
    finish: usize,
    attempts: Vec<usize>,
}

/// Call counts shared by every instance created from one factory.
///
/// Clones observe the same counts.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Calls>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `setup` calls.
    #[must_use]
    pub fn setup_calls(&self) -> usize {
        self.calls.lock().setup
    }

    /// Number of `process` calls.
    #[must_use]
    pub fn process_calls(&self) -> usize {
        self.calls.lock().process
    }

    /// Number of `finish` calls.
    #[must_use]
    pub fn finish_calls(&self) -> usize {
        self.calls.lock().finish
    }

    /// Attempt numbers seen by `process`, in call order.
    #[must_use]
    pub fn attempts(&self) -> Vec<usize> {
        self.calls.lock().attempts.clone()
    }

    /// Resets all counts.
    pub fn reset(&self) {
        *self.calls.lock() = Calls::default();
    }

    fn on_setup(&self) {
        self.calls.lock().setup += 1;
    }

    /// Records a `process` call and returns how many came before it.
    fn on_process(&self, ctx: &TaskContext) -> usize {
        let mut calls = self.calls.lock();
        calls.attempts.push(ctx.attempt());
        calls.process += 1;
        calls.process - 1
    }

    fn on_finish(&self) {
        self.calls.lock().finish += 1;
    }
}

/// A task that always produces the same outputs.
#[derive(Debug, Clone)]
pub struct ConstantTask {
    capability: Capability,
    outputs: Outputs,
    log: CallLog,
}

impl ConstantTask {
    /// Creates a single-rank task with no outputs.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            capability: Capability::SingleRank,
            outputs: Outputs::new(),
            log,
        }
    }

    /// Sets the capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, payload: Payload) -> Self {
        self.outputs.insert(name.into(), payload);
        self
    }

    /// Adds a structured-value output.
    #[must_use]
    pub fn with_value(self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.with_output(name, Payload::Value(value))
    }
}

impl Task for ConstantTask {
    fn capability(&self) -> Capability {
        self.capability.clone()
    }

    fn setup(&mut self, _params: &Parameters) -> Result<(), TaskError> {
        self.log.on_setup();
        Ok(())
    }

    fn process(&mut self, ctx: &TaskContext, _inputs: &Inputs) -> Result<Outputs, TaskError> {
        self.log.on_process(ctx);
        Ok(self.outputs.clone())
    }

    fn finish(&mut self) {
        self.log.on_finish();
    }
}

/// A task whose first `failures` calls fail with a retryable error.
#[derive(Debug, Clone)]
pub struct FlakyTask {
    inner: ConstantTask,
    failures: usize,
}

impl FlakyTask {
    /// Wraps `inner`, failing its first `failures` calls.
    #[must_use]
    pub fn new(inner: ConstantTask, failures: usize) -> Self {
        Self { inner, failures }
    }
}

impl Task for FlakyTask {
    fn capability(&self) -> Capability {
        self.inner.capability()
    }

    fn setup(&mut self, params: &Parameters) -> Result<(), TaskError> {
        self.inner.setup(params)
    }

    fn process(&mut self, ctx: &TaskContext, _inputs: &Inputs) -> Result<Outputs, TaskError> {
        let before = self.inner.log.on_process(ctx);
        if before < self.failures {
            return Err(TaskError::retryable(format!("transient failure {}", before + 1)));
        }
        Ok(self.inner.outputs.clone())
    }

    fn finish(&mut self) {
        self.inner.finish();
    }
}

/// A task that fails fatally on one rank and succeeds elsewhere.
#[derive(Debug, Clone)]
pub struct FatalTask {
    inner: ConstantTask,
    failing_rank: usize,
}

impl FatalTask {
    /// Wraps `inner`, failing fatally on `failing_rank`.
    #[must_use]
    pub fn new(inner: ConstantTask, failing_rank: usize) -> Self {
        Self { inner, failing_rank }
    }
}

impl Task for FatalTask {
    fn capability(&self) -> Capability {
        self.inner.capability()
    }

    fn setup(&mut self, params: &Parameters) -> Result<(), TaskError> {
        self.inner.setup(params)
    }

    fn process(&mut self, ctx: &TaskContext, inputs: &Inputs) -> Result<Outputs, TaskError> {
        if ctx.rank() == self.failing_rank {
            self.inner.log.on_process(ctx);
            return Err(TaskError::fatal(format!("rank {} hit bad data", ctx.rank())));
        }
        self.inner.process(ctx, inputs)
    }

    fn finish(&mut self) {
        self.inner.finish();
    }
}

/// A task that rejects every parameter set.
#[derive(Debug, Clone)]
pub struct RejectingTask {
    log: CallLog,
}

impl RejectingTask {
    /// Creates a rejecting task.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl Task for RejectingTask {
    fn capability(&self) -> Capability {
        Capability::SingleRank
    }

    fn setup(&mut self, params: &Parameters) -> Result<(), TaskError> {
        self.log.on_setup();
        Err(TaskError::configuration(format!(
            "unsupported parameters: {:?}",
            params.keys().collect::<Vec<_>>()
        )))
    }

    fn process(&mut self, ctx: &TaskContext, _inputs: &Inputs) -> Result<Outputs, TaskError> {
        self.log.on_process(ctx);
        Ok(Outputs::new())
    }

    fn finish(&mut self) {
        self.log.on_finish();
    }
}

/// An all-ranks task summing an array input.
///
/// Each rank sums its share of the rows of input `data`, the shares are
/// combined with an all-reduce, and every rank outputs the total as `sum`.
#[derive(Debug, Clone)]
pub struct PartitionedSumTask {
    log: CallLog,
}

impl PartitionedSumTask {
    /// Creates the task.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl Task for PartitionedSumTask {
    fn capability(&self) -> Capability {
        Capability::AllRanks
    }

    fn process(&mut self, ctx: &TaskContext, inputs: &Inputs) -> Result<Outputs, TaskError> {
        self.log.on_process(ctx);
        let ranks = ctx
            .collectives()
            .ok_or_else(|| TaskError::configuration("collectives unavailable"))?;
        let data = inputs
            .get("data")
            .and_then(|p| p.array())
            .ok_or_else(|| TaskError::fatal("input 'data' must be an array"))?;

        let rows = data.shape().first().copied().unwrap_or(0);
        let blocks = data
            .split_rows(&[ranks.local_range(rows)])
            .map_err(|e| TaskError::fatal(e.to_string()))?;
        let local: f64 = blocks.iter().map(NdArray::sum).sum();
        let total = ranks
            .all_reduce(local, ReduceOp::Sum)
            .map_err(|e| TaskError::fatal(e.to_string()))?;

        Ok(Outputs::from([("sum".to_string(), Payload::Value(total.into()))]))
    }

    fn finish(&mut self) {
        self.log.on_finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::RankContext;
    use serde_json::json;

    fn ctx(attempt: usize) -> TaskContext {
        TaskContext::new("s", attempt, RankContext::serial(), Capability::SingleRank)
    }

    #[test]
    fn test_constant_task() {
        let log = CallLog::new();
        let mut task = ConstantTask::new(log.clone()).with_value("x", json!(1));

        task.setup(&Parameters::new()).unwrap();
        let out = task.process(&ctx(1), &Inputs::new()).unwrap();
        task.finish();

        assert_eq!(out["x"].as_value(), Some(&json!(1)));
        assert_eq!((log.setup_calls(), log.process_calls(), log.finish_calls()), (1, 1, 1));
    }

    #[test]
    fn test_flaky_task_counts_across_instances() {
        let log = CallLog::new();
        let make = || FlakyTask::new(ConstantTask::new(log.clone()).with_value("x", json!(1)), 2);

        assert!(make().process(&ctx(1), &Inputs::new()).unwrap_err().is_retryable());
        assert!(make().process(&ctx(2), &Inputs::new()).is_err());
        assert!(make().process(&ctx(3), &Inputs::new()).is_ok());
        assert_eq!(log.attempts(), vec![1, 2, 3]);

        log.reset();
        assert_eq!(log.process_calls(), 0);
    }

    #[test]
    fn test_fatal_task_only_on_its_rank() {
        let mut task = FatalTask::new(ConstantTask::new(CallLog::new()), 0);
        let err = task.process(&ctx(1), &Inputs::new()).unwrap_err();
        assert!(matches!(err, TaskError::Fatal(_)));

        let mut elsewhere = FatalTask::new(ConstantTask::new(CallLog::new()), 1);
        assert!(elsewhere.process(&ctx(1), &Inputs::new()).is_ok());
    }

    #[test]
    fn test_rejecting_task() {
        let mut task = RejectingTask::new(CallLog::new());
        let err = task.setup(&Parameters::new()).unwrap_err();
        assert!(!err.is_retryable());
    }
}
