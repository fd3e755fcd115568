//! # Taskmill core
//!
//! Broker-agnostic building blocks for the Taskmill task queue:
//!
//! - **Task records** ([`TaskRecord`], [`ExecutionRecord`]) and the JSON
//!   codec that defines the on-broker wire format
//! - **Task IDs**: random 32-byte IDs, or content hashes for unique tasks
//! - **Key layout** ([`Keyspace`]): every broker key and channel name
//! - **Task registry** ([`TaskRegistry`]): name → handler dispatch with
//!   per-task options
//! - **Configuration** ([`Config`]): runtime knobs with environment loading
//!
//! The broker adapter and the worker runtime live in `taskmill-broker` and
//! `taskmill-worker`; both consume these types.

pub mod clock;
pub mod config;
pub mod keys;
pub mod registry;
pub mod task;

pub use clock::now_ts;
pub use config::{Config, ConfigError};
pub use keys::Keyspace;
pub use registry::{RegisteredTask, TaskCall, TaskOptions, TaskRegistry};
pub use task::{
    random_task_id, unique_task_id, validate_func_name, ExecutionRecord, InvalidFuncName,
    TaskRecord, TaskStatus,
};
