//! In-process rank groups backed by threads.
//!
//! `LocalGroup` gives every rank its own [`LocalCommunicator`] over shared
//! state guarded by a mutex and condition variable. It is the substrate used
//! for tests and single-node runs; a cluster deployment supplies its own
//! [`Communicator`] over the site's message-passing library.

use super::{Communicator, RankContext};
use crate::errors::{CommError, ErrorKind, FailureNotice};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
struct GatherState {
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Vec<u8>>>,
    result: Arc<Vec<Vec<u8>>>,
    aborted: Option<FailureNotice>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<GatherState>,
    cond: Condvar,
}

/// Factory for a group of in-process ranks.
#[derive(Debug, Clone, Copy)]
pub struct LocalGroup;

impl LocalGroup {
    /// Creates `size` communicators sharing one group.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[must_use]
    pub fn communicators(size: usize) -> Vec<LocalCommunicator> {
        assert!(size > 0, "a rank group needs at least one rank");
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(GatherState {
                generation: 0,
                arrived: 0,
                slots: vec![None; size],
                result: Arc::new(Vec::new()),
                aborted: None,
            }),
            cond: Condvar::new(),
        });

        (0..size)
            .map(|rank| LocalCommunicator {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Creates `size` rank contexts sharing one group.
    #[must_use]
    pub fn contexts(size: usize) -> Vec<RankContext> {
        Self::communicators(size)
            .into_iter()
            .map(RankContext::new)
            .collect()
    }

    /// Runs `f` once per rank on its own thread and returns the results
    /// ordered by rank.
    ///
    /// A rank whose closure panics aborts the group first, so its peers fail
    /// out of their collectives instead of waiting forever; the panic is then
    /// propagated to the caller.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(RankContext) -> T + Sync,
    {
        let contexts = Self::contexts(size);
        let f = &f;

        std::thread::scope(|scope| {
            let handles: Vec<_> = contexts
                .into_iter()
                .map(|ctx| {
                    scope.spawn(move || {
                        let _guard = AbortOnPanic(ctx.clone());
                        f(ctx)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
                .collect()
        })
    }
}

struct AbortOnPanic(RankContext);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(rank = self.0.rank(), "rank panicked, aborting group");
            self.0.signal_failure(FailureNotice {
                rank: self.0.rank(),
                stage: None,
                kind: ErrorKind::CollectiveFailure,
                message: "rank panicked".to_string(),
            });
        }
    }
}

/// One rank's handle on a [`LocalGroup`].
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    shared: Arc<Shared>,
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_gather_bytes(&self, contribution: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        let mut state = self.shared.state.lock();
        if let Some(notice) = &state.aborted {
            return Err(CommError::Aborted(notice.clone()));
        }

        state.slots[self.rank] = Some(contribution);
        state.arrived += 1;

        if state.arrived == self.shared.size {
            let gathered: Vec<Vec<u8>> = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            let result = Arc::new(gathered);
            state.result = Arc::clone(&result);
            state.arrived = 0;
            state.generation += 1;
            self.shared.cond.notify_all();
            return Ok(result.as_ref().clone());
        }

        // The round cannot be overwritten before this rank reads it: the next
        // round needs this rank's contribution to complete.
        let generation = state.generation;
        while state.generation == generation {
            if let Some(notice) = &state.aborted {
                return Err(CommError::Aborted(notice.clone()));
            }
            self.shared.cond.wait(&mut state);
        }
        Ok(state.result.as_ref().clone())
    }

    fn abort(&self, notice: FailureNotice) {
        let mut state = self.shared.state.lock();
        if state.aborted.is_none() {
            state.aborted = Some(notice);
        }
        self.shared.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_gather_orders_by_rank() {
        let results = LocalGroup::run(4, |ctx| ctx.all_gather(&(ctx.rank() * 10)).unwrap());
        for gathered in results {
            assert_eq!(gathered, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn test_many_consecutive_rounds() {
        let results = LocalGroup::run(3, |ctx| {
            let mut total = 0;
            for round in 0..50 {
                let values = ctx.all_gather(&(ctx.rank() + round)).unwrap();
                total += values.iter().sum::<usize>();
            }
            total
        });
        assert!(results.iter().all(|&t| t == results[0]));
    }

    #[test]
    fn test_abort_wakes_blocked_ranks() {
        let results = LocalGroup::run(3, |ctx| {
            if ctx.rank() == 2 {
                ctx.signal_failure(FailureNotice {
                    rank: 2,
                    stage: Some("s".into()),
                    kind: ErrorKind::FatalTask,
                    message: "boom".into(),
                });
            }
            ctx.barrier()
        });

        for result in results {
            let err = result.unwrap_err();
            assert_eq!(err.notice.as_ref().map(|n| n.rank), Some(2));
        }
    }

    #[test]
    fn test_single_rank_group() {
        let comms = LocalGroup::communicators(1);
        assert_eq!(comms[0].all_gather_bytes(vec![7]).unwrap(), vec![vec![7]]);
    }
}
