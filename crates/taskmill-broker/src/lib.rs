//! # Taskmill broker
//!
//! The broker side of Taskmill:
//!
//! - [`Broker`]: the adapter trait over the atomic primitives the queue
//!   core needs (strings, sets, sorted sets, lists, pub/sub, pipeline, and
//!   three multi-key scripts)
//! - [`RedisBroker`]: the production implementation (Lua scripts via
//!   `EVALSHA`, reconnecting connection manager)
//! - [`MemoryBroker`]: an in-memory implementation with the same
//!   atomicity guarantees, primarily for tests
//! - [`Producer`]: the enqueue API
//!
//! All cross-key consistency flows through [`Broker::zpoppush`],
//! [`Broker::srem_if_not_exists`] and [`Broker::delete_if_not_in_zsets`];
//! every other write is single-key.

pub mod adapter;
pub mod memory;
pub mod producer;
pub mod redis;
pub mod scripts;

pub use adapter::{Broker, BrokerError, Subscription, UpdateSets, WriteOp};
pub use memory::MemoryBroker;
pub use producer::{EnqueueOptions, Producer, ProducerError};
pub use self::redis::RedisBroker;
