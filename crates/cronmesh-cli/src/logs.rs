//! Execution log commands backed by the log store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::info;

use cronmesh_config::CronMeshConfig;
use cronmesh_storage::{LogSink, LogStore};
use cronmesh_types::{LogRecord, Response};

/// Open and ping the log store, creating its directory if needed.
pub async fn open_store(
    config: &CronMeshConfig,
    db_override: Option<&Path>,
) -> anyhow::Result<Arc<LogStore>> {
    let path = match db_override {
        Some(path) => path.to_path_buf(),
        None => config.log_store.resolve_path()?,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log store dir {}", parent.display()))?;
    }
    let store = LogStore::open(&path).with_context(|| format!("open log store {}", path.display()))?;
    store.ping().await.context("log store ping")?;
    Ok(Arc::new(store))
}

pub async fn list(store: &LogStore, name: &str, skip: u64, limit: u64) -> anyhow::Result<Response> {
    let records = store.query(name, skip, limit).await?;
    Ok(Response::ok(json!(records)))
}

pub async fn purge(store: &LogStore, name: &str) -> anyhow::Result<Response> {
    let removed = store.delete_by_job(name).await?;
    info!(job = %name, removed, "purged execution logs");
    Ok(Response::ok(json!({ "removed": removed })))
}

/// Ship the records in `file` through a log sink configured like a worker's.
pub async fn import(store: Arc<LogStore>, file: &Path, config: &CronMeshConfig) -> anyhow::Result<Response> {
    let content = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let records: Vec<LogRecord> =
        serde_json::from_slice(&content).with_context(|| format!("parse {}", file.display()))?;
    let total = records.len();

    let before = store.count("").await?;
    let (sink, handle) = LogSink::spawn(
        store.clone(),
        config.log_sink.batch_size,
        Duration::from_millis(config.log_sink.commit_timeout_ms),
    );
    let mut queued: usize = 0;
    for record in records {
        if sink.send(record).await {
            queued += 1;
        }
    }
    drop(sink);
    handle.await?;
    let imported = store.count("").await?.saturating_sub(before);

    Ok(Response::ok(json!({
        "total": total,
        "queued": queued,
        "imported": imported,
    })))
}

pub async fn health(store: &LogStore, config: &CronMeshConfig) -> anyhow::Result<Response> {
    let records = store.count("").await?;
    Ok(Response::ok(json!({
        "logStore": {
            "path": store.path(),
            "records": records,
            "decodeFailures": store.decode_failures(),
        },
        "logSink": {
            "batchSize": config.log_sink.batch_size,
            "commitTimeoutMs": config.log_sink.commit_timeout_ms,
        },
        "keysRoot": config.keys.root,
        "timezone": config.schedule.timezone,
    })))
}
