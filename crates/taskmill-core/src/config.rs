//! Runtime configuration
//!
//! One [`Config`] is shared by producers and workers. Defaults match the
//! wire protocol's expectations; `from_env` overlays `TASKMILL_*`
//! environment variables on top of them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::Keyspace;

/// Configuration for producers and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Key namespace prefix.
    pub prefix: String,

    /// Queue used when neither the enqueue call nor the task declares one.
    pub default_queue: String,

    /// Task deadline when neither the record nor the registered task
    /// specifies one.
    #[serde(with = "duration_secs")]
    pub default_hard_timeout: Duration,

    /// How often an executing task's score in `active:<Q>` is refreshed.
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Horizon after which an unheartbeated active task is presumed
    /// abandoned. Must exceed the heartbeat interval by several multiples.
    #[serde(with = "duration_secs")]
    pub reclaim_timeout: Duration,

    /// Maximum expired tasks moved back per queue per pass.
    pub reclaim_batch_size: usize,

    /// Broker connection URL.
    pub broker_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: "t".to_string(),
            default_queue: "default".to_string(),
            default_hard_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(10),
            reclaim_timeout: Duration::from_secs(60),
            reclaim_batch_size: 10,
            broker_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `TASKMILL_*` environment variables,
    /// defaulting any that are unset. Malformed values are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(prefix) = env_var("TASKMILL_PREFIX") {
            config.prefix = prefix;
        }
        if let Some(queue) = env_var("TASKMILL_DEFAULT_QUEUE") {
            config.default_queue = queue;
        }
        if let Some(secs) = parse_env("TASKMILL_DEFAULT_HARD_TIMEOUT_SECS")? {
            config.default_hard_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env("TASKMILL_HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env("TASKMILL_RECLAIM_TIMEOUT_SECS")? {
            config.reclaim_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_env("TASKMILL_RECLAIM_BATCH_SIZE")? {
            config.reclaim_batch_size = size;
        }
        if let Some(url) = env_var("TASKMILL_BROKER_URL") {
            config.broker_url = url;
        }

        Ok(config)
    }

    /// Set the key namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the default queue.
    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    /// Set the global default hard timeout.
    pub fn with_default_hard_timeout(mut self, timeout: Duration) -> Self {
        self.default_hard_timeout = timeout;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the reclaim horizon.
    pub fn with_reclaim_timeout(mut self, timeout: Duration) -> Self {
        self.reclaim_timeout = timeout;
        self
    }

    /// Set the per-queue reclaim batch size.
    pub fn with_reclaim_batch_size(mut self, size: usize) -> Self {
        self.reclaim_batch_size = size.max(1);
        self
    }

    /// Set the broker URL.
    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = url.into();
        self
    }

    /// Key derivation for this configuration's prefix.
    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(self.prefix.clone())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
{
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::Invalid {
            var: name.to_string(),
            value: raw,
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },
}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
