//! Broker adapter trait
//!
//! Thin abstraction over the atomic primitives the queue core needs from
//! the key-value store: strings, sets, sorted sets, lists, pub/sub, a
//! best-effort pipeline for single-key writes, and the three multi-key
//! scripts that carry all cross-key consistency.
//!
//! Implementations must be thread-safe; the scripted operations must be
//! atomic with respect to every other broker operation.

use async_trait::async_trait;

/// Error type for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Underlying store error (connection, protocol, scripting).
    #[error("broker error: {0}")]
    Backend(String),

    /// The pub/sub subscription is no longer receiving messages.
    #[error("activity subscription closed")]
    SubscriptionClosed,
}

impl BrokerError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Queue-status bookkeeping attached to a successful `zpoppush`.
///
/// When at least one member moved: `queue` is added to `dst_set`, and
/// removed from `src_set` iff the source sorted set is now empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSets {
    pub src_set: String,
    pub dst_set: String,
    pub queue: String,
}

/// A single-key write, batched through [`Broker::pipelined`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { key: String, value: String },
    Del { key: String },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, member: String },
    RPush { key: String, value: String },
    Publish { channel: String, message: String },
}

/// A pub/sub subscription to one channel.
#[async_trait]
pub trait Subscription: Send {
    /// Wait until the next message arrives.
    async fn next_message(&mut self) -> Result<String, BrokerError>;

    /// Return a message only if one is already available; never blocks.
    async fn try_message(&mut self) -> Result<Option<String>, BrokerError>;
}

/// The atomic primitives the queue core consumes.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    // Strings

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError>;
    async fn del(&self, key: &str) -> Result<(), BrokerError>;

    // Sets

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BrokerError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), BrokerError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, BrokerError>;

    // Sorted sets

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), BrokerError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), BrokerError>;
    async fn zcard(&self, key: &str) -> Result<usize, BrokerError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, BrokerError>;

    /// All members with scores, ascending by score.
    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>, BrokerError>;

    // Lists

    async fn rpush(&self, key: &str, value: &str) -> Result<(), BrokerError>;
    async fn lrange(&self, key: &str) -> Result<Vec<String>, BrokerError>;

    // Pub/sub

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BrokerError>;
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Execute a batch of single-key writes in one round trip. Best-effort:
    /// the batch is not transactional, which is acceptable everywhere it is
    /// used (no consistency-critical read depends on it).
    async fn pipelined(&self, ops: &[WriteOp]) -> Result<(), BrokerError>;

    // Atomic multi-key scripts

    /// Move up to `count` members of `src` with score ≤ `max_score`
    /// (unbounded when `None`) into `dst` at `new_score`, returning the
    /// moved members in ascending score order. With `on_success`, performs
    /// the queue-status bookkeeping described on [`UpdateSets`] iff at
    /// least one member moved.
    async fn zpoppush(
        &self,
        src: &str,
        dst: &str,
        count: usize,
        max_score: Option<f64>,
        new_score: f64,
        on_success: Option<&UpdateSets>,
    ) -> Result<Vec<String>, BrokerError>;

    /// Remove `member` from the set at `set_key` iff the sorted set at
    /// `zset_key` is empty. Returns whether the member was removed.
    async fn srem_if_not_exists(
        &self,
        set_key: &str,
        member: &str,
        zset_key: &str,
    ) -> Result<bool, BrokerError>;

    /// Delete `record_key` iff `id` is not a member of any of the listed
    /// sorted sets. Returns whether the key was deleted.
    async fn delete_if_not_in_zsets(
        &self,
        record_key: &str,
        id: &str,
        zsets: &[String],
    ) -> Result<bool, BrokerError>;
}
