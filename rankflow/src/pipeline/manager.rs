//! Pipeline orchestration across a rank group.
//!
//! One [`PipelineManager`] runs per rank, each with identical configuration.
//! The run is a synchronous loop over the plan; the only points where a rank
//! waits on its peers are the collectives issued here and inside
//! [`Capability::AllRanks`] tasks.
//!
//! Per stage:
//!
//! 1. fingerprint the stage from its spec and input fingerprints
//! 2. the root checks the cache and broadcasts the decision; on a hit every
//!    rank loads the outputs and agrees, falling back to a miss if any rank
//!    could not load them
//! 3. on a miss, run the task on the ranks its capability names; after each
//!    attempt the ranks exchange outcomes, so any retryable failure makes
//!    every rank retry and any fatal one makes every rank abort
//! 4. the root publishes the outputs, then all ranks agree (post-publish
//!    barrier)
//! 5. record the stage and checkpoint

use super::retry::{should_retry, RetryDecision, RetryState};
use super::{DependencyGraph, ExecutionPlan, RunReport, RunState, StageRecord, StageSpec, StageSummary};
use crate::cache::ProductCache;
use crate::config::ManagerConfig;
use crate::core::{DataProduct, Fingerprint, RunPhase, StageStatus};
use crate::errors::{ConfigurationError, ErrorKind, FailureNotice, PipelineError, StageFailure, TaskError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::rank::{RankContext, ROOT};
use crate::task::{Capability, Inputs, Outputs, Task, TaskContext, TaskGuard, TaskRegistry};
use crate::utils::{generate_run_id, now_utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

/// A rank's outcome of one attempt, exchanged so every rank takes the same
/// retry decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum AttemptVote {
    Succeeded,
    /// The rank does not run this task.
    Idle,
    Retryable(String),
    Failed(StageFailure),
}

/// Outputs adopted by every rank, together with the attempts they took.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Execution {
    outputs: Outputs,
    attempts: usize,
}

type Products = BTreeMap<String, Arc<DataProduct>>;

/// Orchestrates pipeline runs on one rank.
pub struct PipelineManager {
    config: ManagerConfig,
    registry: TaskRegistry,
    ranks: RankContext,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("rank", &self.ranks.rank())
            .finish_non_exhaustive()
    }
}

impl PipelineManager {
    /// Creates a manager for this rank.
    #[must_use]
    pub fn new(config: ManagerConfig, registry: TaskRegistry, ranks: RankContext) -> Self {
        Self {
            config,
            registry,
            ranks,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The rank this manager runs on.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.ranks.rank()
    }

    /// Validates task types and builds the execution plan. Local to this
    /// rank; issues no collectives.
    ///
    /// # Errors
    ///
    /// Returns a configuration-class error for unknown task types or an
    /// invalid stage graph.
    pub fn plan(&self, specs: Vec<StageSpec>) -> Result<ExecutionPlan, PipelineError> {
        if let Some(spec) = specs.iter().find(|s| !self.registry.contains(&s.task_type)) {
            return Err(ConfigurationError::new(format!(
                "Stage '{}' uses unknown task type '{}'",
                spec.name, spec.task_type
            ))
            .with_stages(vec![spec.name.clone()])
            .with_hint(format!("Registered task types: {}", self.registry.names().join(", ")))
            .into());
        }
        Ok(DependencyGraph::new(specs).build()?)
    }

    /// Runs the pipeline to completion or abort.
    ///
    /// Every rank must call `run` with the same stages. The returned report
    /// is `Completed` on every rank or `Aborted` on every rank.
    pub fn run(&self, specs: Vec<StageSpec>) -> RunReport {
        let rank = self.rank();
        let plan = match self.plan(specs) {
            Ok(plan) => plan,
            Err(err) => {
                error!(rank, error = %err, "planning failed");
                return self.planning_failed(err);
            }
        };

        let cache = match ProductCache::new(&self.config.cache_dir, &self.config.pipeline) {
            Ok(cache) => cache,
            Err(err) => {
                error!(rank, error = %err, "cannot open product cache");
                return self.planning_failed(err.into());
            }
        };

        let started = self
            .agree_on_plan(&plan)
            .and_then(|()| self.initial_state(&plan, &cache))
            .and_then(|mut state| begin(&mut state).map(|()| state));
        let mut state = match started {
            Ok(state) => state,
            Err(err) => {
                error!(rank, error = %err, "run could not start");
                return self.planning_failed(err);
            }
        };

        let mut run = Run {
            manager: self,
            plan: &plan,
            cache: &cache,
            products: Products::new(),
            summaries: Vec::new(),
        };
        run.execute(&mut state)
    }

    /// Aborts before any stage ran.
    fn planning_failed(&self, err: PipelineError) -> RunReport {
        self.release_peers(&err, err.stage());
        self.events.emit(
            events::RUN_ABORTED,
            Some(json!({"kind": err.kind(), "message": err.to_string(), "phase": RunPhase::Planning})),
        );
        RunReport::aborted(
            generate_run_id(),
            self.config.pipeline.clone(),
            self.rank(),
            Vec::new(),
            Products::new(),
            err,
            false,
        )
    }

    /// Aborts the rank group so no peer waits on a collective this rank
    /// will never enter. A no-op on a single rank or once already signalled.
    fn release_peers(&self, err: &PipelineError, stage: Option<&str>) {
        if self.ranks.size() == 1 || self.ranks.has_failed() {
            return;
        }
        self.ranks.signal_failure(FailureNotice {
            rank: self.rank(),
            stage: stage.map(str::to_string),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn agree_on_plan(&self, plan: &ExecutionPlan) -> Result<(), PipelineError> {
        if !self.config.verify_plan {
            return Ok(());
        }

        let fingerprints = self.ranks.all_gather(plan.fingerprint())?;
        let divergent: Vec<usize> = fingerprints
            .iter()
            .enumerate()
            .filter_map(|(rank, fp)| (fp != &fingerprints[ROOT]).then_some(rank))
            .collect();

        if divergent.is_empty() {
            debug!(rank = self.rank(), fingerprint = plan.fingerprint().short(), "plan agreed");
            return Ok(());
        }

        Err(ConfigurationError::new(format!(
            "plan divergence: ranks {divergent:?} built a different plan than rank {ROOT}"
        ))
        .with_hint("Every rank must be started with identical stage configuration.")
        .into())
    }

    /// The root restores or creates the run state and broadcasts it, so every
    /// rank shares one run id.
    fn initial_state(&self, plan: &ExecutionPlan, cache: &ProductCache) -> Result<RunState, PipelineError> {
        let local = self.ranks.is_root().then(|| {
            let fresh = || RunState::new(&self.config.pipeline, plan.fingerprint().clone());
            if !self.config.resume {
                return fresh();
            }
            match cache.load_state() {
                Ok(Some(state)) if &state.plan_fingerprint == plan.fingerprint() => {
                    info!(run_id = %state.run_id, completed = state.stages.len(), "resuming from checkpoint");
                    state.resumed()
                }
                Ok(Some(state)) => {
                    warn!(
                        run_id = %state.run_id,
                        checkpoint_plan = state.plan_fingerprint.short(),
                        current_plan = plan.fingerprint().short(),
                        "discarding checkpoint for a different plan"
                    );
                    fresh()
                }
                Ok(None) => fresh(),
                Err(err) => {
                    warn!(error = %err, "discarding unreadable checkpoint");
                    fresh()
                }
            }
        });

        Ok(self.ranks.broadcast(local.as_ref(), ROOT)?)
    }
}

/// Moves an agreed run state into `Running`. The state is identical on every
/// rank, so every rank takes the same branch.
fn begin(state: &mut RunState) -> Result<(), PipelineError> {
    if state.transition(RunPhase::Running) {
        return Ok(());
    }
    Err(ConfigurationError::new(format!(
        "run {} cannot start from the {} phase",
        state.run_id, state.phase
    ))
    .with_hint("Only a fresh or resumed run state can be started.")
    .into())
}

/// One in-flight run on one rank.
struct Run<'a> {
    manager: &'a PipelineManager,
    plan: &'a ExecutionPlan,
    cache: &'a ProductCache,
    products: Products,
    summaries: Vec<StageSummary>,
}

impl Run<'_> {
    fn ranks(&self) -> &RankContext {
        &self.manager.ranks
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.manager.events.emit(event_type, Some(data));
    }

    fn checkpoint(&self, state: &RunState) {
        if !self.ranks().is_root() {
            return;
        }
        if let Err(err) = self.cache.save_state(state) {
            warn!(error = %err, "failed to checkpoint run state");
        }
    }

    fn execute(&mut self, state: &mut RunState) -> RunReport {
        let rank = self.ranks().rank();
        self.checkpoint(state);
        info!(
            rank,
            run_id = %state.run_id,
            pipeline = %state.pipeline,
            stages = self.plan.len(),
            "run started"
        );
        self.emit(
            events::RUN_STARTED,
            json!({"run_id": state.run_id, "stages": self.plan.order(), "rank": rank}),
        );

        let plan = self.plan;
        for (position, spec) in plan.stages().iter().enumerate() {
            let span = info_span!("stage", stage = %spec.name, rank);
            let _enter = span.enter();

            if let Err(err) = self.run_stage(spec, position, state) {
                return self.abort(state, spec, err);
            }
        }

        if !state.transition(RunPhase::Completed) {
            warn!(rank, phase = %state.phase, "run state left the running phase early");
        }
        self.checkpoint(state);
        info!(rank, run_id = %state.run_id, executed = self.executed(), "run completed");
        self.emit(
            events::RUN_COMPLETED,
            json!({"run_id": state.run_id, "executed": self.executed(), "stages": self.summaries.len()}),
        );

        RunReport::completed(
            state.run_id,
            state.pipeline.clone(),
            rank,
            std::mem::take(&mut self.summaries),
            std::mem::take(&mut self.products),
        )
    }

    fn executed(&self) -> usize {
        self.summaries.iter().filter(|s| s.status == StageStatus::Executed).count()
    }

    fn abort(&mut self, state: &mut RunState, spec: &StageSpec, err: PipelineError) -> RunReport {
        let rank = self.ranks().rank();
        let stage = err.stage().unwrap_or(spec.name.as_str()).to_string();
        error!(rank, stage = %stage, kind = %err.kind(), error = %err, "run aborted");
        self.manager.release_peers(&err, Some(&stage));

        self.summaries.push(StageSummary {
            stage: spec.name.clone(),
            status: StageStatus::Failed,
            attempts: match &err {
                PipelineError::Stage(f) => f.attempts,
                _ => 0,
            },
            fingerprint: None,
        });

        state.abort(err.to_string());
        self.checkpoint(state);

        let resumable = !state.stages.is_empty();
        self.emit(
            events::STAGE_FAILED,
            json!({"stage": stage, "kind": err.kind(), "message": err.to_string()}),
        );
        self.emit(
            events::RUN_ABORTED,
            json!({"run_id": state.run_id, "stage": stage, "kind": err.kind(), "resumable": resumable}),
        );

        RunReport::aborted(
            state.run_id,
            state.pipeline.clone(),
            rank,
            std::mem::take(&mut self.summaries),
            std::mem::take(&mut self.products),
            err,
            resumable,
        )
        .at_stage(&stage)
    }

    fn run_stage(&mut self, spec: &StageSpec, position: usize, state: &mut RunState) -> Result<(), PipelineError> {
        let inputs: Inputs = spec
            .inputs
            .iter()
            .filter_map(|(input, output)| self.products.get(output).map(|p| (input.clone(), Arc::clone(p))))
            .collect();
        if inputs.len() != spec.inputs.len() {
            return Err(ConfigurationError::new(format!("Stage '{}' ran before its inputs were produced", spec.name))
                .with_stages(vec![spec.name.clone()])
                .into());
        }

        let input_fps: BTreeMap<String, Fingerprint> = inputs
            .iter()
            .map(|(name, product)| (name.clone(), product.fingerprint().clone()))
            .collect();
        let stage_fp = spec.fingerprint(&input_fps);
        let output_fps = spec.output_fingerprints(&stage_fp);

        let (products, status, attempts) = match self.lookup(spec, &output_fps)? {
            Some(products) => {
                info!(fingerprint = stage_fp.short(), "served from cache");
                self.emit(
                    events::STAGE_CACHED,
                    json!({"stage": spec.name, "fingerprint": stage_fp}),
                );
                (products, StageStatus::Cached, 0)
            }
            None => {
                info!(fingerprint = stage_fp.short(), task_type = %spec.task_type, "executing stage");
                self.emit(
                    events::STAGE_STARTED,
                    json!({"stage": spec.name, "fingerprint": stage_fp, "task_type": spec.task_type}),
                );
                let timer = SpanTimer::start(&spec.name);
                let execution = self.execute_task(spec, &inputs)?;
                let products = self.publish(spec, &output_fps, execution.outputs)?;
                let duration_ms = timer.finish();
                info!(attempts = execution.attempts, duration_ms, "stage completed");
                self.emit(
                    events::STAGE_COMPLETED,
                    json!({
                        "stage": spec.name,
                        "fingerprint": stage_fp,
                        "attempts": execution.attempts,
                        "duration_ms": duration_ms,
                    }),
                );
                (products, StageStatus::Executed, execution.attempts)
            }
        };

        self.summaries.push(StageSummary {
            stage: spec.name.clone(),
            status,
            attempts,
            fingerprint: Some(stage_fp.clone()),
        });
        state.record_stage(
            StageRecord {
                stage: spec.name.clone(),
                fingerprint: stage_fp,
                outputs: output_fps,
                attempts,
                status,
                completed_at: now_utc(),
            },
            position,
        );
        self.checkpoint(state);
        self.products.extend(products);
        Ok(())
    }

    /// Returns the stage's outputs if every rank could load all of them.
    fn lookup(&self, spec: &StageSpec, output_fps: &BTreeMap<String, Fingerprint>) -> Result<Option<Products>, PipelineError> {
        let ranks = self.ranks();
        let root_says = ranks
            .is_root()
            .then(|| output_fps.values().all(|fp| self.cache.contains(fp)));
        if !ranks.broadcast(root_says.as_ref(), ROOT)? {
            return Ok(None);
        }

        let loaded: Option<Products> = output_fps
            .iter()
            .map(|(name, fp)| {
                self.cache
                    .get(fp)
                    .filter(|p| p.name() == name && p.producer() == spec.name)
                    .map(|p| (name.clone(), Arc::new(p)))
            })
            .collect();

        let failing = ranks.agree(loaded.is_some())?;
        if failing.is_empty() {
            return Ok(loaded);
        }
        warn!(ranks = ?failing, "cached outputs unreadable on some ranks, recomputing");
        Ok(None)
    }

    /// Wraps outputs into products; the root publishes them, then every rank
    /// waits until publication has succeeded.
    fn publish(
        &self,
        spec: &StageSpec,
        output_fps: &BTreeMap<String, Fingerprint>,
        mut outputs: Outputs,
    ) -> Result<Products, PipelineError> {
        let mut products = Products::new();
        for (name, fp) in output_fps {
            let payload = outputs.remove(name).ok_or_else(|| {
                StageFailure::from_task_error(&spec.name, &TaskError::fatal(format!("missing output '{name}'")), 0)
            })?;
            products.insert(name.clone(), Arc::new(DataProduct::new(name, &spec.name, fp.clone(), payload)));
        }

        let mut published = Ok(());
        if self.ranks().is_root() {
            for product in products.values() {
                if let Err(err) = self.cache.put(product.fingerprint(), product) {
                    error!(product = product.name(), error = %err, "failed to publish product");
                    published = Err(err);
                    break;
                }
            }
        }

        let failing = self.ranks().agree(published.is_ok())?;
        if failing.is_empty() {
            return Ok(products);
        }

        let message = match published {
            Err(err) => err.to_string(),
            Ok(()) => format!("rank {ROOT} failed to publish outputs"),
        };
        Err(StageFailure {
            stage: spec.name.clone(),
            kind: ErrorKind::Storage,
            message,
            attempts: 0,
        }
        .into())
    }

    fn execute_task(&self, spec: &StageSpec, inputs: &Inputs) -> Result<Execution, PipelineError> {
        let ranks = self.ranks();
        let probe = TaskGuard::new(self.create(spec).map_err(|e| StageFailure::from_task_error(&spec.name, &e, 0))?);
        let capability = probe.capability();
        capability
            .validate(ranks.size())
            .map_err(|e| StageFailure::from_task_error(&spec.name, &e, 0))?;
        let participating = capability.participates(ranks.rank());
        debug!(capability = %capability, participating, "dispatching task");

        let mut probe = if participating {
            Some(probe)
        } else {
            drop(probe);
            None
        };
        let mut retry = RetryState::new(spec.retries(self.manager.config.max_retries));

        loop {
            let attempt = retry.attempts();
            let mut outputs = None;
            let vote = if participating {
                let task = match probe.take() {
                    Some(task) => Ok(task),
                    None => self.create(spec).map(TaskGuard::new),
                };
                let ctx = TaskContext::new(&spec.name, attempt, ranks.clone(), capability.clone());
                match task.and_then(|task| self.attempt(task, spec, &ctx, inputs)) {
                    Ok(produced) => {
                        outputs = Some(produced);
                        AttemptVote::Succeeded
                    }
                    Err(err) if err.is_retryable() => {
                        warn!(attempt, error = %err, "attempt failed");
                        AttemptVote::Retryable(err.to_string())
                    }
                    Err(err) => {
                        let failure = StageFailure::from_task_error(&spec.name, &err, attempt);
                        if capability.allows_collectives() {
                            // Peers may be blocked inside the task's own
                            // collectives; the abort releases them.
                            return Err(failure.into());
                        }
                        AttemptVote::Failed(failure)
                    }
                }
            } else {
                AttemptVote::Idle
            };

            let votes = ranks.all_gather(&vote)?;
            if let Some(failure) = votes.iter().find_map(|v| match v {
                AttemptVote::Failed(failure) => Some(failure.clone()),
                _ => None,
            }) {
                return Err(failure.into());
            }

            let retryable = votes.iter().enumerate().find_map(|(rank, v)| match v {
                AttemptVote::Retryable(msg) => Some(TaskError::retryable(format!("rank {rank}: {msg}"))),
                _ => None,
            });
            let Some(err) = retryable else {
                return self.adopt(spec, &capability, outputs, attempt);
            };

            match should_retry(&mut retry, &self.manager.config.retry, &err) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying stage"
                    );
                    self.emit(
                        events::STAGE_RETRY,
                        json!({"stage": spec.name, "attempt": attempt + 1, "reason": err.to_string()}),
                    );
                    std::thread::sleep(delay);
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    return Err(StageFailure::from_task_error(&spec.name, &err, attempt).into());
                }
            }
        }
    }

    /// Settles on the outputs of a successful attempt. Every rank of an
    /// all-ranks task keeps its own; otherwise the lead rank's are broadcast.
    fn adopt(
        &self,
        spec: &StageSpec,
        capability: &Capability,
        outputs: Option<Outputs>,
        attempts: usize,
    ) -> Result<Execution, PipelineError> {
        let ranks = self.ranks();
        if capability.allows_collectives() {
            let outputs = outputs.ok_or_else(|| StageFailure {
                stage: spec.name.clone(),
                kind: ErrorKind::FatalTask,
                message: format!("rank {} recorded no outputs", ranks.rank()),
                attempts,
            })?;
            return Ok(Execution { outputs, attempts });
        }

        let lead = capability.lead_rank();
        let mine = outputs
            .filter(|_| ranks.rank() == lead)
            .map(|outputs| Execution { outputs, attempts });
        Ok(ranks.broadcast(mine.as_ref(), lead)?)
    }

    fn create(&self, spec: &StageSpec) -> Result<Box<dyn Task>, TaskError> {
        self.manager
            .registry
            .create(&spec.task_type)
            .map_err(|e| TaskError::configuration(e.to_string()))
    }

    /// One `setup -> process -> finish` cycle, checked against the declared
    /// outputs.
    fn attempt(
        &self,
        mut task: TaskGuard,
        spec: &StageSpec,
        ctx: &TaskContext,
        inputs: &Inputs,
    ) -> Result<Outputs, TaskError> {
        let result = task
            .setup(&spec.parameters)
            .and_then(|()| task.process(ctx, inputs));
        task.finish();
        let mut outputs = result?;

        if let Some(missing) = spec.outputs.iter().find(|o| !outputs.contains_key(*o)) {
            return Err(TaskError::fatal(format!("stage did not produce declared output '{missing}'")));
        }
        let extra: Vec<String> = outputs
            .keys()
            .filter(|k| !spec.outputs.contains(k))
            .cloned()
            .collect();
        if !extra.is_empty() {
            warn!(extra = ?extra, "ignoring undeclared outputs");
            outputs.retain(|k, _| spec.outputs.contains(k));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RetryConfig;
    use crate::testing::{CallLog, ConstantTask};
    use pretty_assertions::assert_eq;

    fn config(dir: &tempfile::TempDir) -> ManagerConfig {
        ManagerConfig::new()
            .with_pipeline("unit")
            .with_cache_dir(dir.path())
            .with_retry(RetryConfig::immediate())
    }

    fn registry(log: &CallLog) -> TaskRegistry {
        let log = log.clone();
        TaskRegistry::new().with_task("const", move || ConstantTask::new(log.clone()).with_value("x", json!(4.0)))
    }

    #[test]
    fn test_unknown_task_type_fails_planning() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PipelineManager::new(config(&dir), TaskRegistry::new(), RankContext::serial());

        let report = manager.run(vec![StageSpec::new("a", "nope").with_output("x")]);
        let abort = report.abort.clone().unwrap();
        assert_eq!(abort.kind, ErrorKind::Configuration);
        assert_eq!(abort.stage.as_deref(), Some("a"));
        assert!(!abort.resumable);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_serial_run_then_rerun_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::new();
        let specs = vec![StageSpec::new("a", "const").with_output("x")];

        let manager = PipelineManager::new(config(&dir), registry(&log), RankContext::serial());
        let first = manager.run(specs.clone());
        assert!(first.is_completed());
        assert_eq!(first.executed_stages(), vec!["a"]);

        let second = manager.run(specs);
        assert!(second.is_completed());
        assert_eq!(second.cached_stages(), vec!["a"]);
        assert_eq!(second.run_id, first.run_id);
        assert_eq!(second.product("x").and_then(|p| p.value().cloned()), Some(json!(4.0)));
        assert_eq!(log.process_calls(), 1);
    }

    #[test]
    fn test_resume_disabled_starts_new_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::new();
        let specs = vec![StageSpec::new("a", "const").with_output("x")];

        let manager = PipelineManager::new(config(&dir).with_resume(false), registry(&log), RankContext::serial());
        let first = manager.run(specs.clone());
        let second = manager.run(specs);

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.cached_stages(), vec!["a"]);
    }

    #[test]
    fn test_missing_declared_output_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PipelineManager::new(config(&dir), registry(&CallLog::new()), RankContext::serial());

        let report = manager.run(vec![StageSpec::new("a", "const").with_outputs(["x", "y"])]);
        let abort = report.abort.unwrap();
        assert_eq!(abort.kind, ErrorKind::FatalTask);
        assert_eq!(abort.stage.as_deref(), Some("a"));
    }

    #[test]
    fn test_plan_is_local() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PipelineManager::new(config(&dir), registry(&CallLog::new()), RankContext::serial());

        let plan = manager
            .plan(vec![
                StageSpec::new("b", "const").consumes("x").with_output("y"),
                StageSpec::new("a", "const").with_output("x"),
            ])
            .unwrap();
        assert_eq!(plan.order(), vec!["a", "b"]);
    }

    #[test]
    fn test_pipeline_name_must_be_a_valid_name() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::new();
        let config = config(&dir).with_pipeline("../escape");
        let manager = PipelineManager::new(config, registry(&log), RankContext::serial());

        let report = manager.run(vec![StageSpec::new("a", "const").with_output("x")]);
        assert_eq!(report.abort.map(|a| a.kind), Some(ErrorKind::Configuration));
        assert_eq!(log.process_calls(), 0);
        assert!(!dir.path().join("escape.state.json").exists());
    }

    #[test]
    fn test_begin_requires_planning_phase() {
        let mut state = RunState::new("unit", Fingerprint::of_bytes(b"plan"));
        begin(&mut state).unwrap();
        assert_eq!(state.phase, RunPhase::Running);

        let err = begin(&mut state).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("running phase"));
        assert_eq!(state.phase, RunPhase::Running);
    }
}
