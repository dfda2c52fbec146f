//! Registry of running executions, keyed by job name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::execution::{CancelHandle, ExecutionResult, ExecutionState};
use crate::plan::SchedulePlan;

#[derive(Debug)]
struct Running {
    id: Uuid,
    cancel: CancelHandle,
}

type RunningMap = Mutex<HashMap<String, Running>>;

fn lock_map(map: &RunningMap) -> MutexGuard<'_, HashMap<String, Running>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Claim an execution holds on its job's table entry.
///
/// Dropping the claim (with the state or result that carries it) releases
/// the entry if it still belongs to the same execution.
#[derive(Debug)]
pub(crate) struct Lease {
    running: Weak<RunningMap>,
    name: String,
    id: Uuid,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(running) = self.running.upgrade() else {
            return;
        };
        let mut running = lock_map(&running);
        if running.get(&self.name).is_some_and(|entry| entry.id == self.id) {
            running.remove(&self.name);
            debug!(job = %self.name, execution = %self.id, "execution dropped unfinished, job released");
        }
    }
}

/// Tracks at most one active execution per job and routes kill requests.
///
/// A job stays claimed until [`ExecutionTable::finish`] is called with its
/// result, or until its state or result is dropped.
#[derive(Debug, Default)]
pub struct ExecutionTable {
    running: Arc<RunningMap>,
}

impl ExecutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Running>> {
        lock_map(&self.running)
    }

    /// Activate `plan` unless its job is already running.
    pub fn start(&self, plan: &SchedulePlan, now: DateTime<Utc>) -> Option<ExecutionState> {
        let mut running = self.lock();
        let name = &plan.job().name;
        if running.contains_key(name) {
            debug!(job = %name, "job still running, skipping trigger");
            return None;
        }
        let mut state = ExecutionState::activate(plan, now);
        state.lease = Some(Lease {
            running: Arc::downgrade(&self.running),
            name: name.clone(),
            id: state.id(),
        });
        running.insert(
            name.clone(),
            Running {
                id: state.id(),
                cancel: state.cancel_handle().clone(),
            },
        );
        Some(state)
    }

    /// Cancel the running execution of `name`. Returns whether one was running.
    pub fn kill(&self, name: &str) -> bool {
        match self.lock().get(name) {
            Some(entry) => {
                if entry.cancel.cancel() {
                    info!(job = %name, execution = %entry.id, "kill requested");
                }
                true
            }
            None => false,
        }
    }

    /// Release the job of a finished execution so it may run again.
    pub fn finish(&self, result: &ExecutionResult) -> bool {
        let mut running = self.lock();
        let state = result.state();
        let name = &state.job().name;
        let owned = running.get(name).is_some_and(|entry| entry.id == state.id());
        if owned {
            running.remove(name);
        }
        owned
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::plan::build_plan;
    use cronmesh_types::Job;

    fn plan(name: &str) -> SchedulePlan {
        build_plan(Job::new(name, "sleep 1", "* * * * * *")).unwrap()
    }

    #[test]
    fn test_one_execution_per_job() {
        let table = ExecutionTable::new();
        let first = plan("job1");
        let state = table.start(&first, Utc::now()).unwrap();
        assert!(table.is_running("job1"));
        assert!(table.start(&first, Utc::now()).is_none());

        // Other jobs are unaffected
        let _second = table.start(&plan("job2"), Utc::now()).unwrap();
        assert_eq!(table.len(), 2);

        let now = Utc::now();
        let result = state.finalize(Vec::new(), None, now, now, "host");
        assert!(table.finish(&result));
        assert!(!table.is_running("job1"));
        assert!(table.start(&first, Utc::now()).is_some());
    }

    #[test]
    fn test_dropped_execution_releases_job() {
        let table = ExecutionTable::new();
        let job = plan("job1");
        let state = table.start(&job, Utc::now()).unwrap();
        assert!(table.is_running("job1"));

        // Executor went away without finalizing
        drop(state);
        assert!(!table.is_running("job1"));
        assert!(!table.kill("job1"));

        let state = table.start(&job, Utc::now()).unwrap();
        let now = Utc::now();
        let result = state.finalize(Vec::new(), None, now, now, "host");
        assert!(table.is_running("job1"));
        drop(result);
        assert!(table.is_empty());
    }

    #[test]
    fn test_stale_drop_keeps_newer_execution() {
        let table = ExecutionTable::new();
        let job = plan("job1");
        let old = table.start(&job, Utc::now()).unwrap();
        let now = Utc::now();
        assert!(table.finish(&old.finalize(Vec::new(), None, now, now, "host")));

        let current = table.start(&job, Utc::now()).unwrap();
        // The finished result was already dropped; the new claim is intact
        assert!(table.is_running("job1"));
        assert!(table.kill("job1"));
        assert!(current.cancel_handle().is_cancelled());
    }

    #[test]
    fn test_kill_cancels_running_execution() {
        let table = ExecutionTable::new();
        let state = table.start(&plan("job1"), Utc::now()).unwrap();
        assert!(table.kill("job1"));
        assert!(table.kill("job1"));
        assert_eq!(state.status(), ExecutionStatus::Cancelled);
        assert!(!table.kill("unknown"));
    }

    #[test]
    fn test_finish_ignores_stale_result() {
        let table = ExecutionTable::new();
        let plan = plan("job1");
        // Activated outside the table, so its id is not registered
        let stray = ExecutionState::activate(&plan, Utc::now());
        let _running = table.start(&plan, Utc::now()).unwrap();
        let now = Utc::now();
        let result = stray.finalize(Vec::new(), None, now, now, "host");
        assert!(!table.finish(&result));
        assert!(table.is_running("job1"));
    }
}
