//! cronmesh-cron: job lifecycle.
//!
//! Turns job definitions into scheduling plans, plans into live executions
//! carrying a cancellation handle, and executions into immutable results
//! ready to be shipped to the log store.

pub mod execution;
pub mod plan;
pub mod scheduler;
pub mod table;

use thiserror::Error;

pub use execution::{
    CancelHandle, ExecutionResult, ExecutionState, ExecutionStatus, activate, cancel,
};
pub use plan::{PlanZone, SchedulePlan, build_plan, build_plan_at, build_plan_in};
pub use scheduler::{PlanTable, ScheduleTick};
pub use table::ExecutionTable;

/// Errors raised while turning a job definition into a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("cron expression '{expr}' has no upcoming occurrence")]
    Exhausted { expr: String },
    #[error("invalid time zone '{zone}': expected local, utc or an offset like +08:00")]
    InvalidZone { zone: String },
}
