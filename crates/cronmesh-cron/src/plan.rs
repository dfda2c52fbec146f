//! Schedule planner: cron expression to next trigger instant.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use cron::Schedule;

use cronmesh_types::Job;

use crate::PlanError;

/// Time zone cron fields are interpreted in.
///
/// Trigger instants are always reported in UTC; the zone only decides
/// which wall clock `0 0 3 * * *` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanZone {
    /// The process's local zone.
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl FromStr for PlanZone {
    type Err = PlanError;

    /// Accepts `local`, `utc` (or `z`) and offsets such as `+08:00` or `-0530`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "local" => return Ok(PlanZone::Local),
            "utc" | "z" => return Ok(PlanZone::Utc),
            _ => {}
        }
        parse_offset(trimmed)
            .map(PlanZone::Fixed)
            .ok_or_else(|| PlanError::InvalidZone {
                zone: s.to_string(),
            })
    }
}

impl fmt::Display for PlanZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanZone::Local => f.write_str("local"),
            PlanZone::Utc => f.write_str("utc"),
            PlanZone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// A job paired with its parsed cron expression and next trigger instant.
///
/// Plans are never mutated; [`SchedulePlan::next_after`] returns a new one.
#[derive(Debug, Clone)]
pub struct SchedulePlan {
    job: Job,
    schedule: Schedule,
    zone: PlanZone,
    next_time: DateTime<Utc>,
}

impl SchedulePlan {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn zone(&self) -> PlanZone {
        self.zone
    }

    /// Earliest trigger instant strictly after the reference used to build the plan.
    pub fn next_time(&self) -> DateTime<Utc> {
        self.next_time
    }

    /// Whether the plan should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_time <= now
    }

    /// Successor plan for the first occurrence strictly after `reference`.
    ///
    /// A reference earlier than the current `next_time` is raised to it, so
    /// successive plans of one job always move forward.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Result<SchedulePlan, PlanError> {
        let reference = reference.max(self.next_time);
        let next_time = next_occurrence(&self.schedule, self.zone, reference).ok_or_else(|| {
            PlanError::Exhausted {
                expr: self.job.cron_expr.clone(),
            }
        })?;
        Ok(SchedulePlan {
            job: self.job.clone(),
            schedule: self.schedule.clone(),
            zone: self.zone,
            next_time,
        })
    }

    /// The next `count` trigger instants, starting with `next_time`.
    pub fn upcoming(&self, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut next = Some(self.next_time);
        while times.len() < count {
            let Some(time) = next else { break };
            times.push(time);
            next = next_occurrence(&self.schedule, self.zone, time);
        }
        times
    }
}

/// Build a plan whose `next_time` is the first local-time occurrence after now.
pub fn build_plan(job: Job) -> Result<SchedulePlan, PlanError> {
    build_plan_at(job, Utc::now())
}

/// Build a plan in the local zone relative to an explicit reference instant.
pub fn build_plan_at(job: Job, reference: DateTime<Utc>) -> Result<SchedulePlan, PlanError> {
    build_plan_in(job, reference, PlanZone::Local)
}

/// Build a plan whose cron fields are read in `zone`.
pub fn build_plan_in(
    job: Job,
    reference: DateTime<Utc>,
    zone: PlanZone,
) -> Result<SchedulePlan, PlanError> {
    let schedule = parse_cron(&job.cron_expr)?;
    let next_time =
        next_occurrence(&schedule, zone, reference).ok_or_else(|| PlanError::Exhausted {
            expr: job.cron_expr.clone(),
        })?;
    Ok(SchedulePlan {
        job,
        schedule,
        zone,
        next_time,
    })
}

/// Parse a cron expression.
///
/// Accepts `sec min hour dom month dow [year]`, the `@daily`-style
/// shorthands, and classic five-field expressions, which fire at second 0.
pub fn parse_cron(expr: &str) -> Result<Schedule, PlanError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(PlanError::InvalidCron {
            expr: expr.to_string(),
            reason: "expression is empty".to_string(),
        });
    }

    let normalized = if !trimmed.starts_with('@') && trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| PlanError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

fn next_occurrence(
    schedule: &Schedule,
    zone: PlanZone,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match zone {
        PlanZone::Local => first_after(schedule, reference.with_timezone(&Local)),
        PlanZone::Utc => first_after(schedule, reference),
        PlanZone::Fixed(offset) => first_after(schedule, reference.with_timezone(&offset)),
    }
}

// An occurrence equal to the reference is skipped so a boundary
// recomputation never fires the same trigger twice.
fn first_after<Z: TimeZone>(schedule: &Schedule, reference: DateTime<Z>) -> Option<DateTime<Utc>> {
    schedule
        .after(&reference)
        .find(|t| *t > reference)
        .map(|t| t.with_timezone(&Utc))
}
