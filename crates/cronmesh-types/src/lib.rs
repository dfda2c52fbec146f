//! cronmesh-types: data model shared by the master and the workers.
//!
//! Job definitions, change events, persisted log records and the JSON
//! response envelope handed to the administrative API.

pub mod keys;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub use keys::{KeyNamespace, extract_job_name, extract_killer_name, extract_worker_ip};

/// `errno` value of a successful response.
pub const ERRNO_OK: i32 = 0;
/// `errno` value of any failed response.
pub const ERRNO_FAILURE: i32 = -1;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid job payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

// ──────────────────── Job Types ────────────────────

/// A job definition as stored in the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job name.
    pub name: String,
    /// Shell command to run.
    pub command: String,
    /// Cron expression, validated when a plan is built.
    #[serde(rename = "cronExpr")]
    pub cron_expr: String,
    /// Worker the job is pinned to. Empty on the wire means any worker.
    #[serde(
        rename = "workIp",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub pinned_host: Option<String>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        cron_expr: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            cron_expr: cron_expr.into(),
            pinned_host: None,
        }
    }

    /// Pin the job to a single worker.
    pub fn pinned_to(mut self, host: impl Into<String>) -> Self {
        self.pinned_host = Some(host.into());
        self
    }

    /// Whether a worker reachable at `host` may run this job.
    pub fn runs_on(&self, host: &str) -> bool {
        self.pinned_host.as_deref().is_none_or(|pinned| pinned == host)
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Decode a job definition from its JSON wire payload.
pub fn unpack_job(value: &[u8]) -> Result<Job, DefinitionError> {
    serde_json::from_slice(value).map_err(DefinitionError::Decode)
}

// ──────────────────── Change Events ────────────────────

/// Kind of change observed on a job definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The job was created or updated.
    Save,
    /// The job was deleted.
    Delete,
}

/// Notification that a job definition changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "job", rename_all = "snake_case")]
pub enum ChangeEvent {
    Save(Job),
    Delete(Job),
}

impl ChangeEvent {
    pub fn save(job: Job) -> Self {
        Self::Save(job)
    }

    pub fn delete(job: Job) -> Self {
        Self::Delete(job)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Save(_) => EventKind::Save,
            Self::Delete(_) => EventKind::Delete,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            Self::Save(job) | Self::Delete(job) => job,
        }
    }
}

/// Build a change event of the given kind.
pub fn build_event(kind: EventKind, job: Job) -> ChangeEvent {
    match kind {
        EventKind::Save => ChangeEvent::Save(job),
        EventKind::Delete => ChangeEvent::Delete(job),
    }
}

// ──────────────────── Log Records ────────────────────

/// Persisted form of one execution. Instants are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub job_name: String,
    pub command: String,
    /// Failure description, empty on success.
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub output: String,
    /// Trigger instant computed by the plan.
    pub plan_time: i64,
    /// Instant the execution was actually activated.
    pub schedule_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    /// Worker that ran the command.
    #[serde(default)]
    pub work_ip: String,
}

// ──────────────────── Response Envelope ────────────────────

/// JSON envelope returned by the administrative API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub errno: i32,
    pub msg: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Response {
    pub fn new(errno: i32, msg: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            errno,
            msg: msg.into(),
            data,
        }
    }

    /// Successful response carrying `data`.
    pub fn ok(data: serde_json::Value) -> Self {
        Self::new(ERRNO_OK, "success", data)
    }

    /// Failed response; `data` is null.
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::new(ERRNO_FAILURE, msg, serde_json::Value::Null)
    }

    pub fn is_ok(&self) -> bool {
        self.errno == ERRNO_OK
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DefinitionError> {
        serde_json::to_vec(self).map_err(DefinitionError::Encode)
    }
}

/// Encode a response envelope in one call.
pub fn build_response(
    errno: i32,
    msg: &str,
    data: serde_json::Value,
) -> Result<Vec<u8>, DefinitionError> {
    Response::new(errno, msg, data).to_bytes()
}
