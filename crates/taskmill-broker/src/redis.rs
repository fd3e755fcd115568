//! Redis implementation of the broker adapter
//!
//! Commands go through a reconnecting [`ConnectionManager`]; the multi-key
//! operations are Lua scripts (`EVALSHA` with automatic load). Pub/sub uses
//! a dedicated connection per subscription, as the protocol requires.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use futures::FutureExt;
// `::redis` disambiguates the crate from this module's own path.
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};

use crate::adapter::{Broker, BrokerError, Subscription, UpdateSets, WriteOp};
use crate::scripts::{
    DELETE_IF_NOT_IN_ZSETS_SCRIPT, SREM_IF_NOT_EXISTS_SCRIPT, ZPOPPUSH_SCRIPT,
};

/// Broker adapter backed by Redis.
pub struct RedisBroker {
    client: redis::Client,
    conn: ConnectionManager,
    zpoppush: Script,
    srem_if_not_exists: Script,
    delete_if_not_in_zsets: Script,
}

impl RedisBroker {
    /// Connect to the broker at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// Each process must build its own `RedisBroker`: connections are never
    /// shared across a process boundary, so a task child opening a fresh
    /// broker cannot disturb its parent's sockets.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_tokio_connection_manager().await?;

        Ok(Self {
            client,
            conn,
            zpoppush: Script::new(ZPOPPUSH_SCRIPT),
            srem_if_not_exists: Script::new(SREM_IF_NOT_EXISTS_SCRIPT),
            delete_if_not_in_zsets: Script::new(DELETE_IF_NOT_IN_ZSETS_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        Ok(self.conn().set(key, value).await?)
    }

    async fn del(&self, key: &str) -> Result<(), BrokerError> {
        Ok(self.conn().del(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        Ok(self.conn().sadd(key, member).await?)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        Ok(self.conn().srem(key, member).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        Ok(self.conn().smembers(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), BrokerError> {
        Ok(self.conn().zadd(key, member, score).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        Ok(self.conn().zrem(key, member).await?)
    }

    async fn zcard(&self, key: &str) -> Result<usize, BrokerError> {
        Ok(self.conn().zcard(key).await?)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, BrokerError> {
        Ok(self.conn().zscore(key, member).await?)
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>, BrokerError> {
        Ok(self.conn().zrange_withscores(key, 0, -1).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        Ok(self.conn().rpush(key, value).await?)
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        Ok(self.conn().lrange(key, 0, -1).await?)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BrokerError> {
        Ok(self.conn().publish(channel, message).await?)
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;

        Ok(Box::new(RedisSubscription {
            stream: Box::pin(pubsub.into_on_message()),
        }))
    }

    async fn pipelined(&self, ops: &[WriteOp]) -> Result<(), BrokerError> {
        let mut pipe = redis::pipe();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                WriteOp::Del { key } => {
                    pipe.del(key).ignore();
                }
                WriteOp::SAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                WriteOp::SRem { key, member } => {
                    pipe.srem(key, member).ignore();
                }
                WriteOp::ZAdd { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                WriteOp::ZRem { key, member } => {
                    pipe.zrem(key, member).ignore();
                }
                WriteOp::RPush { key, value } => {
                    pipe.rpush(key, value).ignore();
                }
                WriteOp::Publish { channel, message } => {
                    pipe.publish(channel, message).ignore();
                }
            }
        }

        let mut conn = self.conn();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn zpoppush(
        &self,
        src: &str,
        dst: &str,
        count: usize,
        max_score: Option<f64>,
        new_score: f64,
        on_success: Option<&UpdateSets>,
    ) -> Result<Vec<String>, BrokerError> {
        if count == 0 {
            return Ok(vec![]);
        }

        let max_score = match max_score {
            Some(score) => score.to_string(),
            None => "+inf".to_string(),
        };

        let mut invocation = self.zpoppush.prepare_invoke();
        invocation.key(src).key(dst);
        if let Some(update) = on_success {
            invocation.key(&update.src_set).key(&update.dst_set);
        }
        invocation
            .arg(count)
            .arg(max_score)
            .arg(new_score.to_string());
        if let Some(update) = on_success {
            invocation.arg(&update.queue);
        }

        let mut conn = self.conn();
        Ok(invocation.invoke_async(&mut conn).await?)
    }

    async fn srem_if_not_exists(
        &self,
        set_key: &str,
        member: &str,
        zset_key: &str,
    ) -> Result<bool, BrokerError> {
        let mut invocation = self.srem_if_not_exists.prepare_invoke();
        invocation.key(set_key).key(zset_key).arg(member);

        let mut conn = self.conn();
        let removed: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn delete_if_not_in_zsets(
        &self,
        record_key: &str,
        id: &str,
        zsets: &[String],
    ) -> Result<bool, BrokerError> {
        let mut invocation = self.delete_if_not_in_zsets.prepare_invoke();
        invocation.key(record_key);
        for zset in zsets {
            invocation.key(zset);
        }
        invocation.arg(id);

        let mut conn = self.conn();
        let deleted: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(deleted > 0)
    }
}

struct RedisSubscription {
    stream: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Result<String, BrokerError> {
        match self.stream.next().await {
            Some(msg) => Ok(msg.get_payload()?),
            None => Err(BrokerError::SubscriptionClosed),
        }
    }

    async fn try_message(&mut self) -> Result<Option<String>, BrokerError> {
        // Poll the stream once; a message already buffered (or readable
        // without blocking) is returned, otherwise fall through.
        match self.stream.next().now_or_never() {
            Some(Some(msg)) => Ok(Some(msg.get_payload()?)),
            Some(None) => Err(BrokerError::SubscriptionClosed),
            None => Ok(None),
        }
    }
}
