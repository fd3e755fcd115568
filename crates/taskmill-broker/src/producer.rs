//! Enqueue API
//!
//! Producers write a task record, insert its ID into the queued bucket,
//! mark the queue as non-empty and announce it on the activity channel,
//! all in one best-effort pipelined batch. No consistency-critical read is
//! involved, so no script is needed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use taskmill_core::{
    now_ts, random_task_id, unique_task_id, validate_func_name, Config, InvalidFuncName,
    Keyspace, TaskRecord, TaskRegistry, TaskStatus,
};

use crate::adapter::{Broker, BrokerError, WriteOp};

/// Errors surfaced to enqueue callers.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The task name cannot be carried on the wire.
    #[error(transparent)]
    InvalidName(#[from] InvalidFuncName),

    /// The record failed to serialize.
    #[error("failed to serialize task record: {0}")]
    Codec(#[from] serde_json::Error),

    /// Broker write failed; the task may or may not have been enqueued.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Per-call enqueue options; unset fields fall back to the task's
/// registered options, then to the global configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Target queue.
    pub queue: Option<String>,

    /// Hard deadline recorded on the task itself.
    pub hard_timeout: Option<Duration>,

    /// Unique-task override; `None` inherits the registered declaration.
    pub unique: Option<bool>,
}

impl EnqueueOptions {
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
        self.unique = Some(unique);
        self
    }
}

/// Enqueue-side handle on the queue.
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(RedisBroker::connect(&config.broker_url).await?);
/// let producer = Producer::new(broker, config);
/// producer
///     .enqueue("emails.send_welcome", vec![json!(42)], Map::new(), EnqueueOptions::new())
///     .await?;
/// ```
pub struct Producer {
    broker: Arc<dyn Broker>,
    config: Config,
    keys: Keyspace,
    registry: Option<Arc<TaskRegistry>>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, config: Config) -> Self {
        let keys = config.keyspace();
        Self {
            broker,
            config,
            keys,
            registry: None,
        }
    }

    /// Attach a task registry so enqueues inherit per-task declarations
    /// (queue, hard timeout, uniqueness).
    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Enqueue one task. Returns the derived task ID; success only means
    /// the broker acknowledged the write, not that the task ran.
    ///
    /// Unique tasks collapse onto a content-hash ID: re-enqueuing while a
    /// prior instance is pending rewrites only `time_last_queued`.
    #[instrument(skip(self, args, kwargs), fields(func = %func))]
    pub async fn enqueue(
        &self,
        func: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        options: EnqueueOptions,
    ) -> Result<String, ProducerError> {
        validate_func_name(func)?;

        let declared = self
            .registry
            .as_ref()
            .and_then(|registry| registry.get(func))
            .map(|task| task.options().clone())
            .unwrap_or_default();

        let unique = options.unique.unwrap_or(declared.unique);
        let queue = options
            .queue
            .or(declared.queue)
            .unwrap_or_else(|| self.config.default_queue.clone());

        let task_id = if unique {
            unique_task_id(func, &args, &kwargs)
        } else {
            random_task_id()
        };

        let now = now_ts();
        let record = TaskRecord {
            id: task_id.clone(),
            func: func.to_string(),
            args,
            kwargs,
            time_last_queued: now,
            unique,
            hard_timeout: options.hard_timeout.map(|t| t.as_secs_f64()),
        };

        self.broker
            .pipelined(&[
                WriteOp::SAdd {
                    key: self.keys.status_set(TaskStatus::Queued),
                    member: queue.clone(),
                },
                WriteOp::Set {
                    key: self.keys.task(&task_id),
                    value: record.encode()?,
                },
                WriteOp::ZAdd {
                    key: self.keys.queue_bucket(TaskStatus::Queued, &queue),
                    member: task_id.clone(),
                    score: now,
                },
                WriteOp::Publish {
                    channel: self.keys.activity(),
                    message: queue.clone(),
                },
            ])
            .await?;

        debug!(%task_id, %queue, unique, "task enqueued");
        Ok(task_id)
    }
}
