//! Child-side task runner
//!
//! Each task runs in a fresh process of the worker binary. The parent sets
//! [`CHILD_MODE_ENV`] and writes a [`TaskEnvelope`] to the child's stdin;
//! the embedding binary routes into [`child_main`] before doing anything
//! else:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = build_registry();
//!     let config = Config::from_env()?;
//!     if taskmill_worker::child::spawned_as_task_runner() {
//!         std::process::exit(taskmill_worker::child::child_main(&registry, &config).await);
//!     }
//!     // ... normal worker startup
//! }
//! ```
//!
//! The child builds its own broker connection (the parent's sockets are
//! never shared across the process boundary), ignores SIGINT so a graceful
//! stop of the parent cannot abort in-flight work, and enforces the hard
//! deadline around the handler. The exit code is the contract with the
//! parent: 0 for success, nonzero for failure.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use taskmill_broker::{Broker, RedisBroker};
use taskmill_core::{now_ts, Config, ExecutionRecord, TaskCall, TaskRecord, TaskRegistry};

use crate::worker::WorkerError;

/// Set by the parent on spawned task runners.
pub const CHILD_MODE_ENV: &str = "TASKMILL_TASK_RUNNER";

/// What the parent writes to the child's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub queue: String,
    pub task: TaskRecord,
}

/// Whether this process was spawned as a task runner.
pub fn spawned_as_task_runner() -> bool {
    std::env::var(CHILD_MODE_ENV).map_or(false, |value| value == "1")
}

/// Run the task handed to this process on stdin; returns the process exit
/// code. Call only when [`spawned_as_task_runner`] is true.
pub async fn child_main(registry: &TaskRegistry, config: &Config) -> i32 {
    ignore_interrupts();

    let broker: Arc<dyn Broker> = match RedisBroker::connect(&config.broker_url).await {
        Ok(broker) => Arc::new(broker),
        Err(err) => {
            error!(%err, "task runner could not connect to broker");
            return 1;
        }
    };

    let mut raw = String::new();
    if let Err(err) = tokio::io::stdin().read_to_string(&mut raw).await {
        error!(%err, "task runner could not read stdin");
        return 1;
    }

    let envelope: TaskEnvelope = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(%err, "task runner received an undecodable envelope");
            return 1;
        }
    };

    match run_task(broker, registry, config, &envelope.queue, &envelope.task).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            error!(%err, task_id = %envelope.task.id, "task runner failed");
            1
        }
    }
}

/// Execute one task under its hard deadline.
///
/// Returns whether the handler succeeded. A failure (handler error or
/// deadline expiry) appends an [`ExecutionRecord`] to the task's execution
/// log first; an unresolvable callable fails without a record, since no
/// traceback would be meaningful.
pub async fn run_task(
    broker: Arc<dyn Broker>,
    registry: &TaskRegistry,
    config: &Config,
    queue: &str,
    task: &TaskRecord,
) -> Result<bool, WorkerError> {
    let Some(registered) = registry.get(&task.func) else {
        warn!(func = %task.func, task_id = %task.id, "cannot resolve task callable");
        return Ok(false);
    };

    let deadline = task
        .hard_timeout
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
        .or(registered.options().hard_timeout)
        .unwrap_or(config.default_hard_timeout);

    let call = TaskCall {
        id: task.id.clone(),
        queue: queue.to_string(),
        args: task.args.clone(),
        kwargs: task.kwargs.clone(),
    };

    let time_started = now_ts();
    let outcome = tokio::time::timeout(deadline, registered.handler()(call)).await;

    let traceback = match outcome {
        Ok(Ok(())) => return Ok(true),
        Ok(Err(err)) => format!("{err:?}"),
        Err(_) => format!(
            "task timed out after {:.1}s (hard timeout)",
            deadline.as_secs_f64()
        ),
    };
    info!(task_id = %task.id, func = %task.func, "task execution failed");

    let execution = ExecutionRecord {
        time_started,
        time_failed: now_ts(),
        traceback,
        success: false,
    };
    let keys = config.keyspace();
    broker
        .rpush(&keys.executions(&task.id), &execution.encode()?)
        .await?;

    Ok(false)
}

/// Keep SIGINT from terminating the child: the parent forwards graceful
/// stop requests to the whole process group, and in-flight work must
/// survive them.
fn ignore_interrupts() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
        Ok(mut interrupts) => {
            tokio::spawn(async move {
                loop {
                    interrupts.recv().await;
                }
            });
        }
        Err(err) => warn!(%err, "could not install SIGINT handler in task runner"),
    }
}
