//! Plan table: the in-memory set of plans a worker schedules from.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cronmesh_types::ChangeEvent;

use crate::PlanError;
use crate::execution::ExecutionState;
use crate::plan::{PlanZone, SchedulePlan, build_plan_in};
use crate::table::ExecutionTable;

/// Outcome of one scheduling pass.
#[derive(Debug, Default)]
pub struct ScheduleTick {
    /// Executions activated during this pass.
    pub started: Vec<ExecutionState>,
    /// Earliest upcoming trigger across all plans, `None` when empty.
    pub next_wake: Option<DateTime<Utc>>,
}

/// Plans keyed by job name, kept in sync through change events.
#[derive(Debug, Default)]
pub struct PlanTable {
    plans: HashMap<String, SchedulePlan>,
    host: Option<String>,
    zone: PlanZone,
}

impl PlanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for a worker at `host`; jobs pinned to other hosts are not planned.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Read cron fields of every plan in `zone` instead of local time.
    pub fn with_zone(mut self, zone: PlanZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn zone(&self) -> PlanZone {
        self.zone
    }

    /// Apply a change event relative to the current time.
    pub fn apply(&mut self, event: &ChangeEvent) -> Result<(), PlanError> {
        self.apply_at(event, Utc::now())
    }

    /// Apply a change event. Duplicate and out-of-order events are harmless.
    ///
    /// A save whose cron expression does not parse leaves any existing plan
    /// for that job in place.
    pub fn apply_at(&mut self, event: &ChangeEvent, now: DateTime<Utc>) -> Result<(), PlanError> {
        match event {
            ChangeEvent::Save(job) => {
                let foreign = self.host.as_deref().is_some_and(|host| !job.runs_on(host));
                if foreign {
                    if self.plans.remove(&job.name).is_some() {
                        info!(job = %job.name, "job pinned to another worker, plan removed");
                    }
                    return Ok(());
                }
                let plan = build_plan_in(job.clone(), now, self.zone).inspect_err(|e| {
                    warn!(job = %job.name, "rejecting job update: {e}");
                })?;
                debug!(job = %job.name, next = %plan.next_time(), "plan installed");
                self.plans.insert(job.name.clone(), plan);
            }
            ChangeEvent::Delete(job) => {
                if self.plans.remove(&job.name).is_some() {
                    debug!(job = %job.name, "plan removed");
                }
            }
        }
        Ok(())
    }

    /// Fire every due plan and advance it past `now`.
    ///
    /// Jobs still running in `executions` keep their place in the schedule
    /// but are not started again.
    pub fn try_schedule(&mut self, now: DateTime<Utc>, executions: &ExecutionTable) -> ScheduleTick {
        let mut tick = ScheduleTick::default();
        let mut exhausted = Vec::new();

        for (name, plan) in self.plans.iter_mut() {
            if plan.is_due(now) {
                if let Some(state) = executions.start(plan, now) {
                    tick.started.push(state);
                }
                match plan.next_after(now) {
                    Ok(next) => *plan = next,
                    Err(e) => {
                        warn!(job = %name, "dropping plan: {e}");
                        exhausted.push(name.clone());
                        continue;
                    }
                }
            }
            let next = plan.next_time();
            tick.next_wake = Some(tick.next_wake.map_or(next, |wake| wake.min(next)));
        }

        for name in exhausted {
            self.plans.remove(&name);
        }
        tick
    }

    pub fn get(&self, name: &str) -> Option<&SchedulePlan> {
        self.plans.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plans.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use cronmesh_types::Job;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn utc_table() -> PlanTable {
        PlanTable::new().with_zone(PlanZone::Utc)
    }

    #[test]
    fn test_save_is_idempotent() {
        let mut table = utc_table();
        let job = Job::new("job1", "date", "*/5 * * * * *");
        table.apply_at(&ChangeEvent::save(job.clone()), at(10, 0, 0)).unwrap();
        table.apply_at(&ChangeEvent::save(job), at(10, 0, 0)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("job1").unwrap().next_time(), at(10, 0, 5));
    }

    #[test]
    fn test_save_replaces_plan() {
        let mut table = utc_table();
        table
            .apply_at(&ChangeEvent::save(Job::new("job1", "date", "*/5 * * * * *")), at(10, 0, 0))
            .unwrap();
        table
            .apply_at(&ChangeEvent::save(Job::new("job1", "uptime", "0 * * * * *")), at(10, 0, 0))
            .unwrap();
        let plan = table.get("job1").unwrap();
        assert_eq!(plan.job().command, "uptime");
        assert_eq!(plan.next_time(), at(10, 1, 0));
    }

    #[test]
    fn test_invalid_save_keeps_existing_plan() {
        let mut table = utc_table();
        table
            .apply_at(&ChangeEvent::save(Job::new("job1", "date", "*/5 * * * * *")), at(10, 0, 0))
            .unwrap();
        let err = table
            .apply_at(&ChangeEvent::save(Job::new("job1", "date", "bogus")), at(10, 0, 0))
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidCron { .. }));
        assert_eq!(table.get("job1").unwrap().job().cron_expr, "*/5 * * * * *");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut table = PlanTable::new();
        let job = Job::new("job1", "date", "* * * * * *");
        table.apply(&ChangeEvent::delete(job.clone())).unwrap();
        table.apply(&ChangeEvent::save(job.clone())).unwrap();
        table.apply(&ChangeEvent::delete(job.clone())).unwrap();
        table.apply(&ChangeEvent::delete(job)).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_zone_applies_to_saved_plans() {
        let zone: PlanZone = "+08:00".parse().unwrap();
        let mut table = PlanTable::for_host("10.0.0.1").with_zone(zone);
        table
            .apply_at(&ChangeEvent::save(Job::new("nightly", "backup", "0 0 3 * * *")), at(0, 0, 0))
            .unwrap();
        let plan = table.get("nightly").unwrap();
        assert_eq!(plan.zone(), zone);
        assert_eq!(plan.next_time(), at(19, 0, 0));
        assert_eq!(PlanTable::new().zone(), PlanZone::Local);
    }

    #[test]
    fn test_pinned_jobs_follow_host() {
        let mut table = PlanTable::for_host("10.0.0.1");
        let job = Job::new("job1", "date", "* * * * * *");
        table.apply(&ChangeEvent::save(job.clone().pinned_to("10.0.0.1"))).unwrap();
        assert_eq!(table.len(), 1);
        // Moved to another worker
        table.apply(&ChangeEvent::save(job.clone().pinned_to("10.0.0.2"))).unwrap();
        assert!(table.is_empty());
        table.apply(&ChangeEvent::save(job)).unwrap();
        assert_eq!(table.names(), vec!["job1".to_string()]);
    }

    #[test]
    fn test_try_schedule_fires_due_plans() {
        let mut table = utc_table();
        let executions = ExecutionTable::new();
        table
            .apply_at(&ChangeEvent::save(Job::new("fast", "date", "*/2 * * * * *")), at(10, 0, 0))
            .unwrap();
        table
            .apply_at(&ChangeEvent::save(Job::new("slow", "date", "0 * * * * *")), at(10, 0, 0))
            .unwrap();

        // Nothing due yet
        let tick = table.try_schedule(at(10, 0, 1), &executions);
        assert!(tick.started.is_empty());
        assert_eq!(tick.next_wake, Some(at(10, 0, 2)));

        let tick = table.try_schedule(at(10, 0, 2), &executions);
        assert_eq!(tick.started.len(), 1);
        assert_eq!(tick.started[0].job().name, "fast");
        assert_eq!(tick.started[0].plan_time(), at(10, 0, 2));
        assert_eq!(tick.next_wake, Some(at(10, 0, 4)));
        assert_eq!(table.get("fast").unwrap().next_time(), at(10, 0, 4));
    }

    #[test]
    fn test_try_schedule_skips_running_job_but_advances() {
        let mut table = utc_table();
        let executions = ExecutionTable::new();
        table
            .apply_at(&ChangeEvent::save(Job::new("job1", "sleep 10", "* * * * * *")), at(10, 0, 0))
            .unwrap();

        let first = table.try_schedule(at(10, 0, 1), &executions);
        assert_eq!(first.started.len(), 1);

        let second = table.try_schedule(at(10, 0, 2), &executions);
        assert!(second.started.is_empty());
        assert_eq!(table.get("job1").unwrap().next_time(), at(10, 0, 3));
    }

    #[test]
    fn test_successive_plans_strictly_increase() {
        let mut table = utc_table();
        let executions = ExecutionTable::new();
        table
            .apply_at(&ChangeEvent::save(Job::new("job1", "true", "*/3 * * * * *")), at(10, 0, 0))
            .unwrap();
        let mut previous = table.get("job1").unwrap().next_time();
        let mut now = at(10, 0, 0);
        for _ in 0..20 {
            now += Duration::seconds(1);
            let tick = table.try_schedule(now, &executions);
            for state in tick.started {
                let now = state.real_time();
                executions.finish(&state.finalize(Vec::new(), None, now, now, "host"));
            }
            let next = table.get("job1").unwrap().next_time();
            assert!(next >= previous);
            assert!(next > now);
            previous = next;
        }
    }

    #[test]
    fn test_empty_table_has_no_wake() {
        let mut table = PlanTable::new();
        let tick = table.try_schedule(Utc::now(), &ExecutionTable::new());
        assert!(tick.started.is_empty());
        assert!(tick.next_wake.is_none());
    }
}
