//! Task registry
//!
//! Workers resolve the `func` field of a task record through an explicit
//! registry built at startup: each entry maps a dotted task name to an async
//! handler plus per-task options. Unknown names fail execution as an
//! unresolvable callable. Producers may share the same registry so that
//! enqueues inherit a task's declared queue, deadline and uniqueness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

/// One claimed invocation, as seen by a handler.
#[derive(Debug, Clone)]
pub struct TaskCall {
    /// Task ID (64 hex characters).
    pub id: String,
    /// Queue the task was claimed from.
    pub queue: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
}

/// Handler outcome. An `Err` is captured as the failure traceback.
pub type TaskResult = anyhow::Result<()>;

/// Boxed async handler stored in the registry.
pub type TaskHandler = Arc<dyn Fn(TaskCall) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Per-task options, the registry-side counterpart of the original
/// declaration metadata. Enqueues without explicit options fall back to
/// these before the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Queue the task is enqueued to by default.
    pub queue: Option<String>,

    /// Default hard deadline for this task.
    pub hard_timeout: Option<Duration>,

    /// Whether enqueues of this task collapse onto a content-hash ID.
    pub unique: bool,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_hard_timeout(mut self, timeout: Duration) -> Self {
        self.hard_timeout = Some(timeout);
        self
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

/// A registered task: handler plus options.
#[derive(Clone)]
pub struct RegisteredTask {
    handler: TaskHandler,
    options: TaskOptions,
}

impl RegisteredTask {
    pub fn handler(&self) -> TaskHandler {
        Arc::clone(&self.handler)
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }
}

/// Registry of task handlers, keyed by dotted task name.
///
/// # Example
///
/// ```
/// use taskmill_core::{TaskOptions, TaskRegistry};
///
/// let mut registry = TaskRegistry::new();
/// registry.register("emails.send_welcome", |call| async move {
///     let _ = call.args;
///     Ok(())
/// });
/// registry.register_with(
///     "reports.rebuild",
///     TaskOptions::new().with_queue("reports").with_unique(true),
///     |_call| async move { Ok(()) },
/// );
///
/// assert!(registry.contains("emails.send_welcome"));
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Register a handler with default options.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(TaskCall) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = TaskResult> + Send + 'static,
    {
        self.register_with(name, TaskOptions::default(), handler);
    }

    /// Register a handler with explicit options.
    pub fn register_with<F, Fut>(&mut self, name: &str, options: TaskOptions, handler: F)
    where
        F: Fn(TaskCall) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = TaskResult> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |call| Box::pin(handler(call)));
        self.tasks
            .insert(name.to_string(), RegisteredTask { handler, options });
    }

    /// Look up a registered task by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Names of all registered tasks.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call() -> TaskCall {
        TaskCall {
            id: "task-id".to_string(),
            queue: "default".to_string(),
            args: vec![json!(1)],
            kwargs: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = TaskRegistry::new();
        registry.register("pkg.mod.noop", |_call| async move { Ok(()) });

        let task = registry.get("pkg.mod.noop").expect("registered");
        let result = task.handler()(call()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_handler_error_surfaces() {
        let mut registry = TaskRegistry::new();
        registry.register("pkg.mod.fails", |_call| async move {
            anyhow::bail!("boom")
        });

        let task = registry.get("pkg.mod.fails").unwrap();
        let err = task.handler()(call()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_unknown_name() {
        let registry = TaskRegistry::new();
        assert!(registry.get("pkg.mod.unknown").is_none());
        assert!(!registry.contains("pkg.mod.unknown"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_options_are_kept() {
        let mut registry = TaskRegistry::new();
        registry.register_with(
            "reports.rebuild",
            TaskOptions::new()
                .with_queue("reports")
                .with_hard_timeout(Duration::from_secs(30))
                .with_unique(true),
            |_call| async move { Ok(()) },
        );

        let options = registry.get("reports.rebuild").unwrap().options();
        assert_eq!(options.queue.as_deref(), Some("reports"));
        assert_eq!(options.hard_timeout, Some(Duration::from_secs(30)));
        assert!(options.unique);
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = TaskRegistry::new();
        registry.register("pkg.mod.task", |_call| async move { Ok(()) });
        registry.register_with(
            "pkg.mod.task",
            TaskOptions::new().with_unique(true),
            |_call| async move { Ok(()) },
        );

        assert_eq!(registry.len(), 1);
        assert!(registry.get("pkg.mod.task").unwrap().options().unique);
    }
}
