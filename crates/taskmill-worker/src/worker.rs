//! Worker main loop
//!
//! A single sequential control flow per worker process:
//!
//! 1. snapshot the `queued` status set and subscribe to the activity
//!    channel;
//! 2. drain activity announcements into the in-memory queue set, blocking
//!    on the channel only when the set is empty (idle workers do not poll);
//! 3. visit the known queues in uniformly random order, claiming and
//!    executing one task per queue per pass;
//! 4. move expired entries of `active:<Q>` back to `queued:<Q>`;
//! 5. between queues, honor a stop request; the current task is never
//!    interrupted.
//!
//! Multiple workers run the same loop against the same broker; safety
//! comes entirely from the atomic scripts and the key invariants, not from
//! any coordination between workers.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use taskmill_broker::{Broker, BrokerError, UpdateSets, WriteOp};
use taskmill_core::{now_ts, Config, Keyspace, TaskRecord, TaskStatus};

use crate::executor::{ExecutorError, TaskExecutor};

/// Worker errors. Any of these ends the worker run; an external
/// supervisor is expected to restart the process.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Broker I/O failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The executor could not run a task at all (spawn failure, envelope
    /// serialization). Note a failing *task* is not an error here.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// A record failed to serialize.
    #[error("failed to serialize record: {0}")]
    Codec(#[from] serde_json::Error),

    /// Signal handler installation failed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Requests a graceful stop of a running worker.
///
/// Stop is advisory: the worker finishes the task in flight, skips the
/// rest of the pass, and returns from [`Worker::run`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// A queue worker.
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(RedisBroker::connect(&config.broker_url).await?);
/// let executor = Arc::new(ForkExecutor::new(broker.clone(), config.clone()));
/// let worker = Worker::new(broker, executor, config);
/// worker.run_until_signalled().await?;
/// ```
pub struct Worker {
    broker: Arc<dyn Broker>,
    executor: Arc<dyn TaskExecutor>,
    keys: Keyspace,
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(broker: Arc<dyn Broker>, executor: Arc<dyn TaskExecutor>, config: Config) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let keys = config.keyspace();
        Self {
            broker,
            executor,
            keys,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Handle for requesting a graceful stop from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run until SIGINT or SIGTERM, then finish the task in flight and
    /// return.
    pub async fn run_until_signalled(&self) -> Result<(), WorkerError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(WorkerError::Signal)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(WorkerError::Signal)?;

        let stop = self.stop_handle();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received, stopping after the current task"),
                _ = sigterm.recv() => info!("SIGTERM received, stopping after the current task"),
            }
            stop.stop();
        });

        self.run().await
    }

    /// Run until a stop is requested through a [`StopHandle`].
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), WorkerError> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        // Subscribe before the snapshot so an enqueue landing between the
        // two is announced on the channel rather than lost.
        let mut activity = self.broker.subscribe(&self.keys.activity()).await?;
        let mut queue_set: HashSet<String> = self
            .broker
            .smembers(&self.keys.status_set(TaskStatus::Queued))
            .await?
            .into_iter()
            .collect();

        info!(known_queues = queue_set.len(), "worker started");

        while !*shutdown_rx.borrow() {
            if queue_set.is_empty() {
                // Idle path: park on the channel, no polling.
                tokio::select! {
                    message = activity.next_message() => {
                        queue_set.insert(message?);
                    }
                    _ = shutdown_rx.changed() => continue,
                }
            }

            // Fold in whatever else has been announced meanwhile.
            while let Some(queue) = activity.try_message().await? {
                queue_set.insert(queue);
            }

            self.run_pass(&mut queue_set, &mut shutdown_rx).await?;
        }

        info!("worker stopped");
        Ok(())
    }

    /// One processing pass over the known queues, followed by the reclaim
    /// sweep unless a stop came in.
    async fn run_pass(
        &self,
        queue_set: &mut HashSet<String>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        let mut queues: Vec<String> = queue_set.iter().cloned().collect();
        queues.shuffle(&mut rand::thread_rng());

        for queue in queues {
            if *shutdown_rx.borrow() {
                return Ok(());
            }
            if self.process_from_queue(&queue).await?.is_none() {
                // Believed empty; the activity channel re-adds it.
                queue_set.remove(&queue);
            }
        }

        if !*shutdown_rx.borrow() {
            self.reclaim_expired_tasks().await?;
        }
        Ok(())
    }

    /// Claim and execute at most one task from `queue`.
    ///
    /// Returns the claimed task ID, or `None` when the queue had nothing
    /// to claim (the signal to drop it from the working set).
    #[instrument(skip(self))]
    async fn process_from_queue(&self, queue: &str) -> Result<Option<String>, WorkerError> {
        let now = now_ts();
        let update = UpdateSets {
            src_set: self.keys.status_set(TaskStatus::Queued),
            dst_set: self.keys.status_set(TaskStatus::Active),
            queue: queue.to_string(),
        };
        let moved = self
            .broker
            .zpoppush(
                &self.keys.queue_bucket(TaskStatus::Queued, queue),
                &self.keys.queue_bucket(TaskStatus::Active, queue),
                1,
                None,
                now,
                Some(&update),
            )
            .await?;

        let Some(task_id) = moved.into_iter().next() else {
            return Ok(None);
        };

        let Some(raw) = self.broker.get(&self.keys.task(&task_id)).await? else {
            // Orphan ID: leave it in active:<Q>, the reclaim sweep will
            // eventually recycle it. The queue may still hold more work.
            error!(%task_id, "task record missing after claim");
            return Ok(Some(task_id));
        };

        let task = match TaskRecord::decode(&raw) {
            Ok(task) => task,
            Err(err) => {
                error!(%task_id, %err, "task record undecodable after claim");
                return Ok(Some(task_id));
            }
        };

        debug!(%task_id, func = %task.func, "executing claimed task");
        let success = self.executor.execute(queue, &task).await?;

        if success {
            self.finish_success(queue, &task).await?;
            debug!(%task_id, "task done");
        } else {
            self.finish_failure(queue, &task.id).await?;
            warn!(%task_id, func = %task.func, "task failed, parked in error queue");
        }

        Ok(Some(task_id))
    }

    /// Success reconciliation: drop the active entry and the record.
    ///
    /// For unique tasks the record may have been re-enqueued while we were
    /// executing, so it is only deleted when the ID sits in no other
    /// bucket of this queue.
    async fn finish_success(&self, queue: &str, task: &TaskRecord) -> Result<(), WorkerError> {
        let active_bucket = self.keys.queue_bucket(TaskStatus::Active, queue);

        self.broker.zrem(&active_bucket, &task.id).await?;
        if task.unique {
            self.broker
                .delete_if_not_in_zsets(
                    &self.keys.task(&task.id),
                    &task.id,
                    &[
                        self.keys.queue_bucket(TaskStatus::Queued, queue),
                        self.keys.queue_bucket(TaskStatus::Error, queue),
                    ],
                )
                .await?;
        } else {
            self.broker.del(&self.keys.task(&task.id)).await?;
        }
        self.broker
            .srem_if_not_exists(
                &self.keys.status_set(TaskStatus::Active),
                queue,
                &active_bucket,
            )
            .await?;
        Ok(())
    }

    /// Failure reconciliation: move the ID to `error:<Q>`, keeping the
    /// record and its execution log for inspection.
    async fn finish_failure(&self, queue: &str, task_id: &str) -> Result<(), WorkerError> {
        let active_bucket = self.keys.queue_bucket(TaskStatus::Active, queue);

        self.broker
            .pipelined(&[
                WriteOp::ZRem {
                    key: active_bucket.clone(),
                    member: task_id.to_string(),
                },
                WriteOp::ZAdd {
                    key: self.keys.queue_bucket(TaskStatus::Error, queue),
                    member: task_id.to_string(),
                    score: now_ts(),
                },
                WriteOp::SAdd {
                    key: self.keys.status_set(TaskStatus::Error),
                    member: queue.to_string(),
                },
            ])
            .await?;
        self.broker
            .srem_if_not_exists(
                &self.keys.status_set(TaskStatus::Active),
                queue,
                &active_bucket,
            )
            .await?;
        Ok(())
    }

    /// Move entries whose heartbeat fell behind the liveness horizon back
    /// into their queued bucket, and wake workers for them.
    ///
    /// The publish is not atomic with the move: a worker already parked on
    /// the channel could miss this wake under pathological ordering and
    /// resume on the next producer publish instead. Accepted.
    #[instrument(skip(self))]
    async fn reclaim_expired_tasks(&self) -> Result<(), WorkerError> {
        let queues = self
            .broker
            .smembers(&self.keys.status_set(TaskStatus::Active))
            .await?;

        let now = now_ts();
        let horizon = now - self.config.reclaim_timeout.as_secs_f64();

        for queue in queues {
            let update = UpdateSets {
                src_set: self.keys.status_set(TaskStatus::Active),
                dst_set: self.keys.status_set(TaskStatus::Queued),
                queue: queue.clone(),
            };
            let reclaimed = self
                .broker
                .zpoppush(
                    &self.keys.queue_bucket(TaskStatus::Active, &queue),
                    &self.keys.queue_bucket(TaskStatus::Queued, &queue),
                    self.config.reclaim_batch_size,
                    Some(horizon),
                    now,
                    Some(&update),
                )
                .await?;

            if !reclaimed.is_empty() {
                warn!(
                    %queue,
                    count = reclaimed.len(),
                    "reclaimed tasks abandoned by a dead worker"
                );
                self.broker.publish(&self.keys.activity(), &queue).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use taskmill_broker::MemoryBroker;

    struct NeverExecutor;

    #[async_trait]
    impl TaskExecutor for NeverExecutor {
        async fn execute(&self, _queue: &str, _task: &TaskRecord) -> Result<bool, ExecutorError> {
            panic!("no task should be executed");
        }
    }

    #[tokio::test]
    async fn test_stop_wakes_idle_worker() {
        let broker = Arc::new(MemoryBroker::new());
        let worker = Arc::new(Worker::new(
            broker,
            Arc::new(NeverExecutor),
            Config::default(),
        ));
        let stop = worker.stop_handle();

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        // Let the worker park on the empty activity channel, then stop it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        stop.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_handle_is_cloneable() {
        let broker = Arc::new(MemoryBroker::new());
        let worker = Worker::new(broker, Arc::new(NeverExecutor), Config::default());
        let stop = worker.stop_handle();
        let stop_clone = stop.clone();
        stop_clone.stop();

        // Stop before run: the loop must exit immediately.
        worker.run().await.unwrap();
        drop(stop);
    }
}
