//! Broker key layout
//!
//! Every key Taskmill touches is colon-joined under a single configurable
//! prefix (default `t`):
//!
//! ```text
//! SET     <p>:queued | <p>:active | <p>:error     queues with items in status
//! STRING  <p>:task:<id>                           serialized task record
//! LIST    <p>:task:<id>:executions                failed execution records
//! ZSET    <p>:queued:<Q>                          IDs scored by enqueue time
//! ZSET    <p>:active:<Q>                          IDs scored by last heartbeat
//! ZSET    <p>:error:<Q>                           IDs scored by failure time
//! CHANNEL <p>:activity                            queue name per enqueue
//! ```
//!
//! This layout is a stable wire format shared by producers and workers.

use crate::task::TaskStatus;

/// Derives broker keys and channel names for one key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut key = String::with_capacity(
            self.prefix.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>(),
        );
        key.push_str(&self.prefix);
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        key
    }

    /// Status set holding the names of queues with at least one task in
    /// `status`, e.g. `t:queued`.
    pub fn status_set(&self, status: TaskStatus) -> String {
        self.join(&[status.as_str()])
    }

    /// Per-queue status bucket, e.g. `t:active:default`.
    pub fn queue_bucket(&self, status: TaskStatus, queue: &str) -> String {
        self.join(&[status.as_str(), queue])
    }

    /// Serialized task record, e.g. `t:task:<id>`.
    pub fn task(&self, task_id: &str) -> String {
        self.join(&["task", task_id])
    }

    /// Failure execution log, e.g. `t:task:<id>:executions`.
    pub fn executions(&self, task_id: &str) -> String {
        self.join(&["task", task_id, "executions"])
    }

    /// Pub/sub channel announcing enqueues, e.g. `t:activity`.
    pub fn activity(&self) -> String {
        self.join(&["activity"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_sets() {
        let keys = Keyspace::new("t");
        assert_eq!(keys.status_set(TaskStatus::Queued), "t:queued");
        assert_eq!(keys.status_set(TaskStatus::Active), "t:active");
        assert_eq!(keys.status_set(TaskStatus::Error), "t:error");
    }

    #[test]
    fn test_queue_buckets() {
        let keys = Keyspace::new("t");
        assert_eq!(
            keys.queue_bucket(TaskStatus::Queued, "default"),
            "t:queued:default"
        );
        assert_eq!(
            keys.queue_bucket(TaskStatus::Error, "emails"),
            "t:error:emails"
        );
    }

    #[test]
    fn test_task_keys() {
        let keys = Keyspace::new("t");
        assert_eq!(keys.task("abc123"), "t:task:abc123");
        assert_eq!(keys.executions("abc123"), "t:task:abc123:executions");
    }

    #[test]
    fn test_activity_channel() {
        let keys = Keyspace::new("t");
        assert_eq!(keys.activity(), "t:activity");
    }

    #[test]
    fn test_custom_prefix() {
        let keys = Keyspace::new("staging");
        assert_eq!(keys.status_set(TaskStatus::Queued), "staging:queued");
        assert_eq!(keys.task("x"), "staging:task:x");
    }
}
