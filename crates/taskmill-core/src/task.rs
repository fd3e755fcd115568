//! Task and execution records
//!
//! [`TaskRecord`] is the serialized payload stored at `task:<id>`;
//! [`ExecutionRecord`] is appended to `task:<id>:executions` when an
//! execution fails. Both serialize as JSON with stable field order; the
//! on-broker format is a public contract for interoperability.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Task status, one per status set / per-queue bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in a queue to be claimed.
    Queued,
    /// Claimed by a worker, scored by last heartbeat.
    Active,
    /// Failed; resting for external inspection.
    Error,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Queued, TaskStatus::Active, TaskStatus::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as stored on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// 64 hex characters: random for regular tasks, SHA-256 of the
    /// canonical call for unique tasks.
    pub id: String,

    /// Dotted identifier resolved through the worker's task registry.
    pub func: String,

    /// Positional arguments; omitted from JSON when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,

    /// Keyword arguments; omitted from JSON when empty.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,

    /// Epoch seconds of the most recent enqueue. Advisory only: a unique
    /// re-enqueue rewrites it while the task may already be executing.
    pub time_last_queued: f64,

    /// Present and true only for unique tasks.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,

    /// Per-task hard deadline override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_timeout: Option<f64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl TaskRecord {
    /// Serialize to the on-broker JSON form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from the on-broker JSON form.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// One failed execution, appended to the task's execution log.
///
/// Successful executions leave no record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Epoch seconds when the handler was invoked.
    pub time_started: f64,

    /// Epoch seconds when the failure was observed.
    pub time_failed: f64,

    /// Rendered error chain, or a timeout description for deadline expiry.
    pub traceback: String,

    /// Always false.
    pub success: bool,
}

impl ExecutionRecord {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Generate a random task ID: 32 bytes from the OS entropy source,
/// hex-encoded.
pub fn random_task_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Derive the ID of a unique task.
///
/// The ID is the hex SHA-256 of the canonical JSON of the call. serde_json
/// objects are BTreeMap-backed, so keys serialize sorted; two call sites
/// with equivalent arguments produce the same ID.
pub fn unique_task_id(func: &str, args: &[Value], kwargs: &Map<String, Value>) -> String {
    let canonical = json!({
        "func": func,
        "args": args,
        "kwargs": kwargs,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)
}

/// A task name the queue cannot carry.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid task name {name:?}: {reason}")]
pub struct InvalidFuncName {
    pub name: String,
    pub reason: &'static str,
}

/// Validate a dotted callable identifier before it is enqueued.
///
/// Names end up inside colon-joined broker keys and pub/sub payloads, so
/// they must be non-empty and free of whitespace and colons.
pub fn validate_func_name(name: &str) -> Result<(), InvalidFuncName> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.contains(':') {
        Some("must not contain ':'")
    } else if name.chars().any(char::is_whitespace) {
        Some("must not contain whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(InvalidFuncName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
