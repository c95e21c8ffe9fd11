//! Task-type name to factory mapping.

use super::Task;
use crate::errors::ConfigurationError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Creates a fresh task instance.
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Registry of task implementations, looked up by a stage's `task_type`.
///
/// Cloning is cheap; factories are shared.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: BTreeMap<String, TaskFactory>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for `name`.
    pub fn register<F, T>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Task + 'static,
    {
        self.factories
            .insert(name.into(), Arc::new(move || Box::new(factory()) as Box<dyn Task>));
        self
    }

    /// Builder-style [`TaskRegistry::register`].
    #[must_use]
    pub fn with_task<F, T>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Task + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered task-type names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Creates a fresh instance of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if `name` is not registered.
    pub fn create(&self, name: &str) -> Result<Box<dyn Task>, ConfigurationError> {
        self.factories.get(name).map(|factory| factory()).ok_or_else(|| {
            ConfigurationError::new(format!("Unknown task type '{name}'"))
                .with_hint(format!("Registered task types: {}", self.names().join(", ")))
        })
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.names())
            .finish()
    }
}
