//! In-memory implementation of the broker adapter for testing
//!
//! The whole keyspace lives behind one mutex, so every operation,
//! including the multi-key scripts, is atomic by construction, matching
//! the guarantees of the Lua scripts. Pub/sub is a broadcast channel per
//! channel name.
//!
//! Like Redis, empty sets and sorted sets do not exist: the last removal
//! deletes the key, which is what the status-set bookkeeping observes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::adapter::{Broker, BrokerError, Subscription, UpdateSets, WriteOp};

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, Vec<String>>,
}

impl State {
    fn sadd(&mut self, key: &str, member: &str) {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    fn srem(&mut self, key: &str, member: &str) -> bool {
        let Some(set) = self.sets.get_mut(key) else {
            return false;
        };
        let removed = set.remove(member);
        if set.is_empty() {
            self.sets.remove(key);
        }
        removed
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        let Some(zset) = self.zsets.get_mut(key) else {
            return false;
        };
        let removed = zset.remove(member).is_some();
        if zset.is_empty() {
            self.zsets.remove(key);
        }
        removed
    }

    fn zset_is_empty(&self, key: &str) -> bool {
        self.zsets.get(key).map_or(true, HashMap::is_empty)
    }

    /// Members of `key` with score ≤ `max_score`, ascending by score, then
    /// by member for a deterministic order on ties.
    fn zrange_ascending(&self, key: &str, max_score: Option<f64>) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = self
            .zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(_, score)| max_score.map_or(true, |max| **score <= max))
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    fn apply(&mut self, op: &WriteOp) -> Option<(String, String)> {
        match op {
            WriteOp::Set { key, value } => {
                self.strings.insert(key.clone(), value.clone());
            }
            WriteOp::Del { key } => {
                self.strings.remove(key);
            }
            WriteOp::SAdd { key, member } => self.sadd(key, member),
            WriteOp::SRem { key, member } => {
                self.srem(key, member);
            }
            WriteOp::ZAdd { key, member, score } => self.zadd(key, member, *score),
            WriteOp::ZRem { key, member } => {
                self.zrem(key, member);
            }
            WriteOp::RPush { key, value } => {
                self.lists.entry(key.clone()).or_default().push(value.clone());
            }
            WriteOp::Publish { channel, message } => {
                // Publishing needs the channel table, not the keyspace.
                return Some((channel.clone(), message.clone()));
            }
        }
        None
    }
}

/// In-memory broker, primarily for tests.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    fn publish_now(&self, channel: &str, message: &str) {
        // A send with no subscribers errors; that is fine for pub/sub.
        let _ = self.sender(channel).send(message.to_string());
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.state.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        self.state
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), BrokerError> {
        self.state.lock().strings.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        self.state.lock().sadd(key, member);
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        self.state.lock().srem(key, member);
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), BrokerError> {
        self.state.lock().zadd(key, member, score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        self.state.lock().zrem(key, member);
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<usize, BrokerError> {
        Ok(self
            .state
            .lock()
            .zsets
            .get(key)
            .map_or(0, HashMap::len))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, BrokerError> {
        Ok(self
            .state
            .lock()
            .zsets
            .get(key)
            .and_then(|zset| zset.get(member).copied()))
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>, BrokerError> {
        Ok(self.state.lock().zrange_ascending(key, None))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        self.state
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        Ok(self
            .state
            .lock()
            .lists
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BrokerError> {
        self.publish_now(channel, message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        Ok(Box::new(MemorySubscription {
            receiver: self.sender(channel).subscribe(),
        }))
    }

    async fn pipelined(&self, ops: &[WriteOp]) -> Result<(), BrokerError> {
        let publishes: Vec<(String, String)> = {
            let mut state = self.state.lock();
            ops.iter().filter_map(|op| state.apply(op)).collect()
        };
        for (channel, message) in publishes {
            self.publish_now(&channel, &message);
        }
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
        let mut state = self.state.lock();

        let mut members = state.zrange_ascending(src, max_score);
        members.truncate(count);
        if members.is_empty() {
            return Ok(vec![]);
        }

        for (member, _) in &members {
            state.zrem(src, member);
            state.zadd(dst, member, new_score);
        }

        if let Some(update) = on_success {
            state.sadd(&update.dst_set, &update.queue);
            if state.zset_is_empty(src) {
                state.srem(&update.src_set, &update.queue);
            }
        }

        Ok(members.into_iter().map(|(member, _)| member).collect())
    }

    async fn srem_if_not_exists(
        &self,
        set_key: &str,
        member: &str,
        zset_key: &str,
    ) -> Result<bool, BrokerError> {
        let mut state = self.state.lock();
        if state.zset_is_empty(zset_key) {
            Ok(state.srem(set_key, member))
        } else {
            Ok(false)
        }
    }

    async fn delete_if_not_in_zsets(
        &self,
        record_key: &str,
        id: &str,
        zsets: &[String],
    ) -> Result<bool, BrokerError> {
        let mut state = self.state.lock();
        let pending = zsets.iter().any(|zset| {
            state
                .zsets
                .get(zset)
                .map_or(false, |members| members.contains_key(id))
        });
        if pending {
            Ok(false)
        } else {
            Ok(state.strings.remove(record_key).is_some())
        }
    }
}

struct MemorySubscription {
    receiver: broadcast::Receiver<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<String, BrokerError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Ok(message),
                // A lagged subscriber just resumes with what is left.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(BrokerError::SubscriptionClosed)
                }
            }
        }
    }

    async fn try_message(&mut self) -> Result<Option<String>, BrokerError> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Ok(Some(message)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(BrokerError::SubscriptionClosed)
                }
            }
        }
    }
}
