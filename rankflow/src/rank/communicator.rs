//! The message-passing substrate the engine calls into.

use crate::errors::{CommError, FailureNotice};
use parking_lot::Mutex;
use std::fmt::Debug;

/// A fixed-size group of ranks able to exchange bytes collectively.
///
/// The engine needs exactly one collective primitive, an ordered
/// all-gather, plus an out-of-band abort. Every higher-level collective in
/// [`RankContext`](super::RankContext) is built on these two, so adapting a
/// new transport means implementing this trait.
///
/// Rank identity and group size must not change for the lifetime of the
/// communicator.
pub trait Communicator: Send + Sync + Debug {
    /// Returns this participant's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Returns the number of participants.
    fn size(&self) -> usize;

    /// Contributes `contribution` and blocks until every rank has contributed.
    ///
    /// Returns all contributions ordered by rank.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::Aborted`] if any rank aborted the group before or
    /// while this call was blocked.
    fn all_gather_bytes(&self, contribution: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError>;

    /// Aborts the group: every rank blocked in, or later entering, a
    /// collective fails with the given notice.
    fn abort(&self, notice: FailureNotice);
}

/// A single-rank communicator for serial runs.
#[derive(Debug, Default)]
pub struct SerialCommunicator {
    aborted: Mutex<Option<FailureNotice>>,
}

impl SerialCommunicator {
    /// Creates a new serial communicator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_bytes(&self, contribution: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        if let Some(notice) = self.aborted.lock().clone() {
            return Err(CommError::Aborted(notice));
        }
        Ok(vec![contribution])
    }

    fn abort(&self, notice: FailureNotice) {
        self.aborted.lock().get_or_insert(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_serial_all_gather() {
        let comm = SerialCommunicator::new();
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.all_gather_bytes(b"x".to_vec()).unwrap(), vec![b"x".to_vec()]);
    }

    #[test]
    fn test_serial_abort_is_sticky() {
        let comm = SerialCommunicator::new();
        comm.abort(FailureNotice {
            rank: 0,
            stage: None,
            kind: ErrorKind::FatalTask,
            message: "first".into(),
        });
        comm.abort(FailureNotice {
            rank: 0,
            stage: None,
            kind: ErrorKind::Task,
            message: "second".into(),
        });

        match comm.all_gather_bytes(Vec::new()) {
            Err(CommError::Aborted(notice)) => assert_eq!(notice.message, "first"),
            other => panic!("expected abort, got {other:?}"),
        }
    }
}
