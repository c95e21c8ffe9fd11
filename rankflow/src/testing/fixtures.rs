//! Test fixtures for pipeline runs.

use std::path::Path;
use std::sync::Arc;

use crate::cache::ProductCache;
use crate::config::ManagerConfig;
use crate::errors::CacheError;
use crate::events::CollectingEventSink;
use crate::pipeline::{PipelineManager, RetryConfig, RunReport, StageSpec};
use crate::rank::{LocalGroup, RankContext};
use crate::task::TaskRegistry;

/// A pipeline under test with its own scratch cache directory.
///
/// The directory is removed when the fixture is dropped. Retries are
/// immediate so failing stages do not slow tests down.
#[derive(Debug)]
pub struct TestPipeline {
    dir: tempfile::TempDir,
    config: ManagerConfig,
    events: Arc<CollectingEventSink>,
}

impl TestPipeline {
    /// Creates a fixture for the named pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch directory cannot be created.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = ManagerConfig::new()
            .with_pipeline(name)
            .with_cache_dir(dir.path())
            .with_retry(RetryConfig::immediate());
        Ok(Self {
            dir,
            config,
            events: Arc::new(CollectingEventSink::new()),
        })
    }

    /// Adjusts the manager configuration.
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(ManagerConfig) -> ManagerConfig) -> Self {
        self.config = f(self.config);
        self
    }

    /// The scratch cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        self.dir.path()
    }

    /// The manager configuration every rank receives.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Events emitted by every rank of every run so far.
    #[must_use]
    pub fn events(&self) -> &CollectingEventSink {
        &self.events
    }

    /// Opens the product cache the runs write to.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be opened.
    pub fn cache(&self) -> Result<ProductCache, CacheError> {
        ProductCache::new(self.dir.path(), &self.config.pipeline)
    }

    /// Creates a manager for one rank.
    #[must_use]
    pub fn manager(&self, registry: TaskRegistry, ranks: RankContext) -> PipelineManager {
        PipelineManager::new(self.config.clone(), registry, ranks).with_event_sink(self.events.clone())
    }

    /// Runs the stages on a single rank.
    #[must_use]
    pub fn run_serial(&self, registry: TaskRegistry, specs: Vec<StageSpec>) -> RunReport {
        self.manager(registry, RankContext::serial()).run(specs)
    }

    /// Runs the stages on `size` in-process ranks and returns the reports
    /// ordered by rank.
    ///
    /// `registry` is called once per rank with the rank number.
    #[must_use]
    pub fn run_ranks<R>(&self, size: usize, registry: R, specs: &[StageSpec]) -> Vec<RunReport>
    where
        R: Fn(usize) -> TaskRegistry + Sync,
    {
        LocalGroup::run(size, |ctx| {
            let rank = ctx.rank();
            self.manager(registry(rank), ctx).run(specs.to_vec())
        })
    }
}
