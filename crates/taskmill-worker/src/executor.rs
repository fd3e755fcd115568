//! Supervised task execution
//!
//! [`ForkExecutor`] runs one task in an isolated child process: it spawns a
//! fresh instance of the worker binary in task-runner mode, hands it the
//! serialized task on stdin, and waits. The wait is broken on a periodic
//! timer; every interruption rescores the task in `active:<Q>` as a
//! heartbeat, so the reclaim pass can tell a live worker from a dead one.
//!
//! The hard deadline is enforced inside the child (see [`crate::child`]);
//! the parent only translates the exit status into an outcome.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{interval_at, Instant};
use tracing::{debug, instrument, warn};

use taskmill_broker::Broker;
use taskmill_core::{now_ts, Config, Keyspace, TaskRecord, TaskStatus};

use crate::child::{TaskEnvelope, CHILD_MODE_ENV};

/// Executor errors. Heartbeat write failures are logged, not raised; a
/// missed beat is recoverable, a lost child is not.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Could not spawn the task child process.
    #[error("failed to spawn task child process: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O against the running child failed.
    #[error("task child process i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The spawned child exposed no stdin to write the task to.
    #[error("task child process has no stdin")]
    Stdin,

    /// The task envelope failed to serialize.
    #[error("failed to serialize task envelope: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Runs one claimed task to completion.
///
/// The worker loop only depends on this seam; tests substitute an
/// in-process implementation.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Execute `task` (claimed from `queue`) and report whether it
    /// succeeded. Must not return before the task has fully stopped
    /// running.
    async fn execute(&self, queue: &str, task: &TaskRecord) -> Result<bool, ExecutorError>;
}

/// Production executor: one supervised child process per task.
pub struct ForkExecutor {
    broker: Arc<dyn Broker>,
    keys: Keyspace,
    config: Config,
    program: Option<PathBuf>,
    program_args: Vec<String>,
}

impl ForkExecutor {
    pub fn new(broker: Arc<dyn Broker>, config: Config) -> Self {
        let keys = config.keyspace();
        Self {
            broker,
            keys,
            config,
            program: None,
            program_args: vec![],
        }
    }

    /// Run tasks through `program` instead of the current executable.
    ///
    /// The default of re-executing the current binary assumes the embedding
    /// binary calls [`crate::child::child_main`] early in its `main`;
    /// deployments with a dedicated runner binary point this at it.
    pub fn with_program(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.program = Some(program.into());
        self.program_args = args;
        self
    }

    fn command(&self) -> Result<Command, ExecutorError> {
        let program = match &self.program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(ExecutorError::Spawn)?,
        };
        let mut command = Command::new(program);
        command
            .args(&self.program_args)
            .env(CHILD_MODE_ENV, "1")
            .stdin(Stdio::piped());
        Ok(command)
    }
}

#[async_trait]
impl TaskExecutor for ForkExecutor {
    #[instrument(skip(self, task), fields(task_id = %task.id, queue = %queue))]
    async fn execute(&self, queue: &str, task: &TaskRecord) -> Result<bool, ExecutorError> {
        let envelope = TaskEnvelope {
            queue: queue.to_string(),
            task: task.clone(),
        };
        let payload = serde_json::to_vec(&envelope)?;

        let mut child = self.command()?.spawn().map_err(ExecutorError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or(ExecutorError::Stdin)?;
        stdin.write_all(&payload).await?;
        // Dropping stdin closes the pipe so the child sees EOF.
        drop(stdin);

        let active_bucket = self.keys.queue_bucket(TaskStatus::Active, queue);
        let mut ticker = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    debug!(?status, "task child exited");
                    // Exit by signal has no code and counts as failure.
                    return Ok(status.success());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self
                        .broker
                        .zadd(&active_bucket, &task.id, now_ts())
                        .await
                    {
                        warn!(%err, "task heartbeat failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::Map;
    use taskmill_broker::MemoryBroker;

    fn record(id: &str) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            func: "pkg.mod.noop".to_string(),
            args: vec![],
            kwargs: Map::new(),
            time_last_queued: now_ts(),
            unique: false,
            hard_timeout: None,
        }
    }

    fn sh_executor(broker: Arc<MemoryBroker>, config: Config, script: &str) -> ForkExecutor {
        ForkExecutor::new(broker, config)
            .with_program("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let broker = Arc::new(MemoryBroker::new());
        let executor = sh_executor(broker, Config::default(), "exit 0");
        let success = executor.execute("default", &record("a")).await.unwrap();
        assert!(success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let broker = Arc::new(MemoryBroker::new());
        let executor = sh_executor(broker, Config::default(), "exit 3");
        let success = executor.execute("default", &record("a")).await.unwrap();
        assert!(!success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_by_signal_is_failure() {
        let broker = Arc::new(MemoryBroker::new());
        let executor = sh_executor(broker, Config::default(), "kill -KILL $$");
        let success = executor.execute("default", &record("a")).await.unwrap();
        assert!(!success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_heartbeats_rescore_active_entry() {
        let broker = Arc::new(MemoryBroker::new());
        let config = Config::default().with_heartbeat_interval(Duration::from_millis(20));
        let keys = config.keyspace();
        let bucket = keys.queue_bucket(TaskStatus::Active, "default");

        // Simulate a claim with a stale score.
        broker.zadd(&bucket, "a", 1.0).await.unwrap();

        let executor = sh_executor(broker.clone(), config, "sleep 0.2");
        let success = executor.execute("default", &record("a")).await.unwrap();
        assert!(success);

        let score = broker.zscore(&bucket, "a").await.unwrap().unwrap();
        assert!(score > 1.0, "heartbeat should have advanced the score");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let broker = Arc::new(MemoryBroker::new());
        let executor = ForkExecutor::new(broker, Config::default())
            .with_program("/nonexistent/taskmill-runner", vec![]);
        let err = executor.execute("default", &record("a")).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn(_)));
    }
}
