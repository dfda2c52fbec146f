//! Execution tracking: live state of one firing and its final result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use cronmesh_types::{Job, LogRecord};

use crate::plan::SchedulePlan;
use crate::table::Lease;

/// Error text of a result whose execution was cancelled.
pub const CANCELLED_MESSAGE: &str = "execution cancelled";

const ACTIVE: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

/// Lifecycle of an execution. Both non-active states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug)]
struct CancelInner {
    status: AtomicU8,
    token: CancellationToken,
}

/// Shared cancellation handle of one execution.
///
/// Leaves `Active` at most once; every later transition attempt is a no-op.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                status: AtomicU8::new(ACTIVE),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Request cancellation. Returns `true` only for the call that moved the
    /// handle out of `Active`.
    pub fn cancel(&self) -> bool {
        let won = self.transition(CANCELLED);
        if won {
            self.inner.token.cancel();
        }
        won
    }

    fn complete(&self) -> bool {
        self.transition(COMPLETED)
    }

    fn transition(&self, to: u8) -> bool {
        self.inner
            .status
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn status(&self) -> ExecutionStatus {
        match self.inner.status.load(Ordering::Acquire) {
            ACTIVE => ExecutionStatus::Active,
            COMPLETED => ExecutionStatus::Completed,
            _ => ExecutionStatus::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == ExecutionStatus::Cancelled
    }

    /// Token for the executor. Cancelling it does not affect this handle.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

/// In-flight execution of one plan occurrence.
///
/// Deliberately not `Clone`: [`ExecutionState::finalize`] consumes it, so
/// each activation yields exactly one result.
#[derive(Debug)]
pub struct ExecutionState {
    id: Uuid,
    job: Job,
    plan_time: DateTime<Utc>,
    real_time: DateTime<Utc>,
    cancel: CancelHandle,
    pub(crate) lease: Option<Lease>,
}

impl ExecutionState {
    /// Activate `plan` at `now` with a fresh handle.
    pub fn activate(plan: &SchedulePlan, now: DateTime<Utc>) -> Self {
        let state = Self {
            id: Uuid::new_v4(),
            job: plan.job().clone(),
            plan_time: plan.next_time(),
            real_time: now,
            cancel: CancelHandle::new(),
            lease: None,
        };
        debug!(
            job = %state.job.name,
            execution = %state.id,
            plan_time = %state.plan_time,
            "execution activated"
        );
        state
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Trigger instant the plan asked for.
    pub fn plan_time(&self) -> DateTime<Utc> {
        self.plan_time
    }

    /// Instant the execution was actually activated.
    pub fn real_time(&self) -> DateTime<Utc> {
        self.real_time
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn status(&self) -> ExecutionStatus {
        self.cancel.status()
    }

    /// Request cancellation; repeated calls and calls after completion are no-ops.
    pub fn cancel(&self) {
        if self.cancel.cancel() {
            debug!(job = %self.job.name, execution = %self.id, "execution cancelled");
        }
    }

    /// Close the execution and produce its result.
    ///
    /// A cancelled execution without an executor error is reported with
    /// [`CANCELLED_MESSAGE`]. An `end` earlier than `start` is clamped.
    pub fn finalize(
        self,
        output: Vec<u8>,
        error: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        executor_host: impl Into<String>,
    ) -> ExecutionResult {
        let completed = self.cancel.complete();
        let error = match error {
            Some(e) => Some(e),
            None if !completed => Some(CANCELLED_MESSAGE.to_string()),
            None => None,
        };

        let end = if end < start {
            warn!(
                job = %self.job.name,
                execution = %self.id,
                "end time {end} precedes start time {start}, clamping"
            );
            start
        } else {
            end
        };

        ExecutionResult {
            state: self,
            output,
            error,
            start_time: start,
            end_time: end,
            executor_host: executor_host.into(),
        }
    }
}

/// Build the live state for a plan that fires at `now`.
pub fn activate(plan: &SchedulePlan, now: DateTime<Utc>) -> ExecutionState {
    ExecutionState::activate(plan, now)
}

/// Request cancellation of an execution.
pub fn cancel(state: &ExecutionState) {
    state.cancel();
}

/// Immutable outcome of one execution.
#[derive(Debug)]
pub struct ExecutionResult {
    state: ExecutionState,
    output: Vec<u8>,
    error: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    executor_host: String,
}

impl ExecutionResult {
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Failure description; set only when the command failed or was cancelled.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn executor_host(&self) -> &str {
        &self.executor_host
    }

    pub fn to_log_record(&self) -> LogRecord {
        LogRecord::from(self)
    }
}

impl From<&ExecutionResult> for LogRecord {
    fn from(result: &ExecutionResult) -> Self {
        let state = &result.state;
        LogRecord {
            job_name: state.job.name.clone(),
            command: state.job.command.clone(),
            err: result.error.clone().unwrap_or_default(),
            output: String::from_utf8_lossy(&result.output).into_owned(),
            plan_time: state.plan_time.timestamp_millis(),
            schedule_time: state.real_time.timestamp_millis(),
            start_time: result.start_time.timestamp_millis(),
            end_time: result.end_time.timestamp_millis(),
            work_ip: result.executor_host.clone(),
        }
    }
}
