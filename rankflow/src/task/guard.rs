//! Scoped ownership of a task instance.

use super::Task;
use std::ops::{Deref, DerefMut};

/// Owns a task instance and calls [`Task::finish`] exactly once.
///
/// `finish` runs when [`TaskGuard::finish`] is called or, failing that, when
/// the guard is dropped (including during a panic unwind).
pub struct TaskGuard {
    task: Box<dyn Task>,
    finished: bool,
}

impl TaskGuard {
    /// Takes ownership of a fresh instance.
    #[must_use]
    pub fn new(task: Box<dyn Task>) -> Self {
        Self { task, finished: false }
    }

    /// Finishes the task now.
    pub fn finish(mut self) {
        self.finish_once();
    }

    fn finish_once(&mut self) {
        if !self.finished {
            self.finished = true;
            self.task.finish();
        }
    }
}

impl std::fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGuard")
            .field("task", &self.task)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Deref for TaskGuard {
    type Target = dyn Task;

    fn deref(&self) -> &Self::Target {
        self.task.as_ref()
    }
}

impl DerefMut for TaskGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.task.as_mut()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.finish_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Capability, MockTask};

    fn mock_finishing_once() -> MockTask {
        let mut task = MockTask::new();
        task.expect_capability().return_const(Capability::SingleRank);
        task.expect_finish().times(1).return_const(());
        task
    }

    #[test]
    fn test_explicit_finish_runs_once() {
        let guard = TaskGuard::new(Box::new(mock_finishing_once()));
        guard.finish();
    }

    #[test]
    fn test_drop_finishes() {
        let guard = TaskGuard::new(Box::new(mock_finishing_once()));
        drop(guard);
    }

    #[test]
    fn test_finish_on_unwind() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = TaskGuard::new(Box::new(mock_finishing_once()));
            panic!("process blew up");
        }));
        assert!(result.is_err());
    }
}
