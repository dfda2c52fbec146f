//! Job definition commands: cron previews and payload validation.

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::json;

use cronmesh_config::CronMeshConfig;
use cronmesh_cron::{PlanZone, build_plan_in};
use cronmesh_types::{Job, Response, unpack_job};

fn plan_zone(config: &CronMeshConfig) -> anyhow::Result<PlanZone> {
    config
        .schedule
        .timezone
        .parse::<PlanZone>()
        .context("schedule.timezone")
}

/// Preview the next `count` trigger instants of `cron`.
pub fn plan(cron: &str, count: usize, config: &CronMeshConfig) -> anyhow::Result<Response> {
    let zone = plan_zone(config)?;
    let plan = build_plan_in(Job::new("preview", "", cron), Utc::now(), zone)?;
    let next: Vec<String> = plan
        .upcoming(count.max(1))
        .iter()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .collect();
    Ok(Response::ok(json!({
        "cronExpr": cron,
        "timezone": zone.to_string(),
        "next": next,
    })))
}

/// Decode a job payload and make sure a plan can be built from it.
pub fn check(payload: &[u8], config: &CronMeshConfig) -> anyhow::Result<Response> {
    let zone = plan_zone(config)?;
    let job = unpack_job(payload)?;
    let plan = build_plan_in(job.clone(), Utc::now(), zone)
        .with_context(|| format!("job '{}'", job.name))?;
    let keys = config.keys.namespace();
    Ok(Response::ok(json!({
        "key": keys.job_key(&job.name),
        "job": job,
        "nextTime": plan.next_time().timestamp_millis(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Timelike};

    #[test]
    fn test_plan_preview() {
        let response = plan("0 0 * * * *", 3, &CronMeshConfig::default()).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.data["next"].as_array().unwrap().len(), 3);
        assert_eq!(response.data["timezone"], "local");
    }

    #[test]
    fn test_plan_uses_configured_zone() {
        let mut config = CronMeshConfig::default();
        config.schedule.timezone = "+08:00".into();
        let response = plan("0 0 3 * * *", 2, &config).unwrap();
        for next in response.data["next"].as_array().unwrap() {
            let time = DateTime::parse_from_rfc3339(next.as_str().unwrap()).unwrap();
            assert_eq!((time.hour(), time.minute()), (19, 0));
        }
    }

    #[test]
    fn test_plan_rejects_bad_cron() {
        let err = plan("every tuesday", 3, &CronMeshConfig::default()).unwrap_err();
        assert!(err.to_string().contains("invalid cron expression"));
    }

    #[test]
    fn test_bad_zone_is_reported() {
        let mut config = CronMeshConfig::default();
        config.schedule.timezone = "Mars/Olympus".into();
        let err = plan("0 0 * * * *", 1, &config).unwrap_err();
        assert!(format!("{err:#}").contains("schedule.timezone"));
    }

    #[test]
    fn test_check_payload() {
        let mut config = CronMeshConfig::default();
        config.keys.root = "/cron/".into();
        let payload = br#"{"name":"job10","command":"echo hi","cronExpr":"*/1 * * * * *"}"#;
        let response = check(payload, &config).unwrap();
        assert_eq!(response.data["key"], "/cron/jobs/job10");
        assert_eq!(response.data["job"]["cronExpr"], "*/1 * * * * *");
        assert!(response.data["nextTime"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_check_rejects_malformed_payload() {
        let config = CronMeshConfig::default();
        assert!(check(b"{\"name\":", &config).is_err());
        let bad_cron = br#"{"name":"a","command":"true","cronExpr":"nope"}"#;
        let err = check(bad_cron, &config).unwrap_err();
        assert!(format!("{err:#}").contains("job 'a'"));
    }
}
