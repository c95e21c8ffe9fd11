//! Rank identity and collective operations.

use super::{partition, Communicator, SerialCommunicator};
use crate::errors::{CollectiveFailure, CommError, FailureNotice};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tracing::{error, trace};

/// The root rank: sole cache writer and source of single-rank results.
pub const ROOT: usize = 0;

/// Reduction applied by [`RankContext::all_reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    /// Sum of all contributions.
    Sum,
    /// Minimum contribution.
    Min,
    /// Maximum contribution.
    Max,
}

impl ReduceOp {
    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// What every rank contributes to a collective: its health flag and an
/// optional payload.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureNotice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

/// A rank's view of the fixed rank group.
///
/// Every collective exchanges an envelope carrying the caller's failure
/// flag. The flags are checked immediately after the exchange, so once any
/// rank has called [`RankContext::signal_failure`] no rank gets past its next
/// collective.
#[derive(Debug, Clone)]
pub struct RankContext {
    comm: Arc<dyn Communicator>,
    failure: Arc<Mutex<Option<FailureNotice>>>,
}

impl RankContext {
    /// Wraps a communicator.
    pub fn new(comm: impl Communicator + 'static) -> Self {
        Self::from_arc(Arc::new(comm))
    }

    /// Wraps a shared communicator.
    #[must_use]
    pub fn from_arc(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a single-rank context.
    #[must_use]
    pub fn serial() -> Self {
        Self::new(SerialCommunicator::new())
    }

    /// Returns this rank's number.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Returns the number of ranks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Returns true only on rank 0.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Returns this rank's block of `n` items distributed over the group.
    #[must_use]
    pub fn local_range(&self, n: usize) -> Range<usize> {
        partition::local_range(n, self.rank(), self.size())
    }

    /// Returns true once this rank has signalled a failure.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    /// Marks this rank as failed and aborts the group.
    ///
    /// Peers blocked in a collective are released with a
    /// [`CollectiveFailure`] carrying `notice`; peers entering one later fail
    /// immediately.
    pub fn signal_failure(&self, notice: FailureNotice) {
        error!(rank = self.rank(), notice = %notice, "signalling failure to rank group");
        self.failure.lock().get_or_insert_with(|| notice.clone());
        self.comm.abort(notice);
    }

    fn fail(&self, message: impl Into<String>) -> CollectiveFailure {
        CollectiveFailure::new(self.rank(), message)
    }

    fn exchange(&self, op: &str, payload: Option<serde_json::Value>) -> Result<Vec<Envelope>, CollectiveFailure> {
        let envelope = Envelope {
            failure: self.failure.lock().clone(),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| self.fail(format!("{op}: encode failed: {e}")))?;

        let gathered = self.comm.all_gather_bytes(bytes).map_err(|e| match e {
            CommError::Aborted(notice) => CollectiveFailure::from_notice(self.rank(), notice),
            CommError::Transport(message) => self.fail(format!("{op}: {message}")),
        })?;

        if gathered.len() != self.size() {
            return Err(self.fail(format!(
                "{op}: expected {} contributions, received {}",
                self.size(),
                gathered.len()
            )));
        }

        let envelopes = gathered
            .iter()
            .map(|bytes| serde_json::from_slice::<Envelope>(bytes))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.fail(format!("{op}: decode failed: {e}")))?;

        if let Some(notice) = envelopes.iter().find_map(|env| env.failure.clone()) {
            return Err(CollectiveFailure::from_notice(self.rank(), notice));
        }

        trace!(rank = self.rank(), op, "collective complete");
        Ok(envelopes)
    }

    fn encode<T: Serialize>(&self, op: &str, value: &T) -> Result<serde_json::Value, CollectiveFailure> {
        serde_json::to_value(value).map_err(|e| self.fail(format!("{op}: encode failed: {e}")))
    }

    fn decode<T: DeserializeOwned>(&self, op: &str, value: Option<serde_json::Value>) -> Result<T, CollectiveFailure> {
        let value = value.ok_or_else(|| self.fail(format!("{op}: missing payload")))?;
        serde_json::from_value(value).map_err(|e| self.fail(format!("{op}: decode failed: {e}")))
    }

    fn check_source(&self, op: &str, source: usize) -> Result<(), CollectiveFailure> {
        if source >= self.size() {
            return Err(self.fail(format!("{op}: source rank {source} outside group of {}", self.size())));
        }
        Ok(())
    }

    /// Blocks until every rank has reached the barrier.
    ///
    /// # Errors
    ///
    /// Returns [`CollectiveFailure`] if any rank has failed.
    pub fn barrier(&self) -> Result<(), CollectiveFailure> {
        self.exchange("barrier", None).map(|_| ())
    }

    /// Distributes the value held by `source` to every rank.
    ///
    /// Only the source's `value` is read; other ranks pass `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectiveFailure`] if any rank has failed or the source
    /// supplied no value.
    pub fn broadcast<T>(&self, value: Option<&T>, source: usize) -> Result<T, CollectiveFailure>
    where
        T: Serialize + DeserializeOwned,
    {
        self.check_source("broadcast", source)?;
        let payload = match value {
            Some(v) if self.rank() == source => Some(self.encode("broadcast", v)?),
            _ => None,
        };
        let mut envelopes = self.exchange("broadcast", payload)?;
        self.decode("broadcast", envelopes.swap_remove(source).payload)
    }

    /// Collects one value per rank on the root.
    ///
    /// The root receives the values ordered by rank; other ranks receive
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectiveFailure`] if any rank has failed.
    pub fn gather<T>(&self, value: &T) -> Result<Option<Vec<T>>, CollectiveFailure>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = self.encode("gather", value)?;
        let envelopes = self.exchange("gather", Some(payload))?;
        if !self.is_root() {
            return Ok(None);
        }
        envelopes
            .into_iter()
            .map(|env| self.decode("gather", env.payload))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Collects one value per rank on every rank, ordered by rank.
    ///
    /// # Errors
    ///
    /// Returns [`CollectiveFailure`] if any rank has failed.
    pub fn all_gather<T>(&self, value: &T) -> Result<Vec<T>, CollectiveFailure>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = self.encode("all_gather", value)?;
        self.exchange("all_gather", Some(payload))?
            .into_iter()
            .map(|env| self.decode("all_gather", env.payload))
            .collect()
    }

    /// Combines one number per rank and returns the result on every rank.
    ///
    /// # Errors
    ///
    /// Returns [`CollectiveFailure`] if any rank has failed.
    pub fn all_reduce(&self, value: f64, op: ReduceOp) -> Result<f64, CollectiveFailure> {
        let values = self.all_gather(&value)?;
        Ok(op.apply(&values))
    }

    /// Exchanges a local success flag and returns the ranks that reported
    /// failure, identical on every rank.
    ///
    /// # Errors
    ///
    /// Returns [`CollectiveFailure`] if any rank has signalled failure.
    pub fn agree(&self, ok: bool) -> Result<Vec<usize>, CollectiveFailure> {
        let flags = self.all_gather(&ok)?;
        Ok(flags
            .iter()
            .enumerate()
            .filter_map(|(rank, ok)| (!ok).then_some(rank))
            .collect())
    }

    /// Hands each rank its own element of the root's `values`.
    ///
    /// The root passes exactly `size()` values; other ranks pass `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectiveFailure`] if any rank has failed or the root
    /// supplied the wrong number of values.
    pub fn scatter<T>(&self, values: Option<Vec<T>>, root: usize) -> Result<T, CollectiveFailure>
    where
        T: Serialize + DeserializeOwned,
    {
        self.check_source("scatter", root)?;
        let payload = match values {
            Some(v) if self.rank() == root => Some(self.encode("scatter", &v)?),
            _ => None,
        };
        let mut envelopes = self.exchange("scatter", payload)?;
        let mut values: Vec<T> = self.decode("scatter", envelopes.swap_remove(root).payload)?;
        if values.len() != self.size() {
            return Err(self.fail(format!(
                "scatter: root supplied {} values for {} ranks",
                values.len(),
                self.size()
            )));
        }
        Ok(values.swap_remove(self.rank()))
    }
}

impl Default for RankContext {
    fn default() -> Self {
        Self::serial()
    }
}
