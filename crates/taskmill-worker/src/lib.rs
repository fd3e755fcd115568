//! # Taskmill worker
//!
//! The consuming side of the Taskmill queue: claim tasks atomically, run
//! each in a supervised child process under a hard deadline, heartbeat
//! while it runs, and reclaim work abandoned by workers that died.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Worker                           │
//! │  (queue discovery, activity channel, random visitation,  │
//! │   post-execution reconciliation, expired-task reclaim)   │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      ForkExecutor                        │
//! │  (spawns the task child, heartbeats active:<Q> while it  │
//! │   runs, maps the exit status to an outcome)              │
//! └──────────────────────────────────────────────────────────┘
//!                             │ stdin: TaskEnvelope
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     child task runner                    │
//! │  (fresh broker connection, SIGINT ignored, hard deadline │
//! │   around the handler, failure execution records)         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskmill_broker::RedisBroker;
//! use taskmill_core::{Config, TaskRegistry};
//! use taskmill_worker::{child, ForkExecutor, Worker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let mut registry = TaskRegistry::new();
//!     registry.register("emails.send_welcome", |call| async move {
//!         // ... the task body
//!         Ok(())
//!     });
//!
//!     // Task children re-enter this binary; route them first.
//!     if child::spawned_as_task_runner() {
//!         std::process::exit(child::child_main(&registry, &config).await);
//!     }
//!
//!     let broker = Arc::new(RedisBroker::connect(&config.broker_url).await?);
//!     let executor = Arc::new(ForkExecutor::new(broker.clone(), config.clone()));
//!     let worker = Worker::new(broker, executor, config);
//!     worker.run_until_signalled().await?;
//!     Ok(())
//! }
//! ```

pub mod child;
pub mod executor;
pub mod worker;

pub use executor::{ExecutorError, ForkExecutor, TaskExecutor};
pub use worker::{StopHandle, Worker, WorkerError};
