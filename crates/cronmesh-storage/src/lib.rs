//! cronmesh-storage: SQLite-based execution log store.
//!
//! One row per finished execution, queried newest first by job name.
//! Instants are stored as INTEGER epoch milliseconds.

pub mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::{Connection, Row};
use tokio::sync::Mutex;

use cronmesh_types::LogRecord;

pub use sink::LogSink;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("batch interrupted after {inserted} records: {source}")]
    PartialBatch {
        inserted: usize,
        #[source]
        source: rusqlite::Error,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS job_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        jobName TEXT NOT NULL,
        command TEXT NOT NULL,
        err TEXT NOT NULL DEFAULT '',
        output TEXT NOT NULL DEFAULT '',
        planTime INTEGER NOT NULL,
        scheduleTime INTEGER NOT NULL,
        startTime INTEGER NOT NULL,
        endTime INTEGER NOT NULL,
        workIp TEXT NOT NULL DEFAULT ''
    );

    CREATE INDEX IF NOT EXISTS idx_job_log_name_start ON job_log (jobName, startTime DESC);";

const SELECT_COLUMNS: &str =
    "jobName, command, err, output, planTime, scheduleTime, startTime, endTime, workIp";

/// SQLite-backed store of execution log records.
///
/// Opened once at startup and shared by every caller; the connection is
/// closed when the last handle is dropped.
pub struct LogStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    decode_failures: Arc<AtomicU64>,
}

impl LogStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Log store opened: {}", path.display());

        Ok(Self::from_connection(conn, Some(path.to_path_buf())))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, None))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            decode_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Round-trip a trivial statement to check the store is usable.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await?
    }

    /// Number of stored rows that failed to decode during queries so far.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    // ─── Queries ───────────────────────────────────

    /// Records of `job_name`, most recent start first.
    ///
    /// An empty name matches every job. `limit == 0` returns every record
    /// after `skip`. Rows that fail to decode are skipped and counted.
    pub async fn query(&self, job_name: &str, skip: u64, limit: u64) -> Result<Vec<LogRecord>> {
        let conn = self.conn.clone();
        let failures = self.decode_failures.clone();
        let job_name = job_name.to_string();
        let limit = if limit == 0 { -1 } else { clamp_i64(limit) };
        let skip = clamp_i64(skip);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM job_log
                 WHERE (?1 = '' OR jobName = ?1)
                 ORDER BY startTime DESC, id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(rusqlite::params![job_name, limit, skip], decode_row)?;

            let mut records = Vec::new();
            for row in rows {
                match row {
                    Ok(record) => records.push(record),
                    Err(e) if is_decode_error(&e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(job = %job_name, "skipping undecodable log record: {e}");
                    }
                    Err(e) => return Err(StorageError::from(e)),
                }
            }
            Ok(records)
        })
        .await?
    }

    /// Number of stored records for `job_name` (empty matches all).
    pub async fn count(&self, job_name: &str) -> Result<u64> {
        let conn = self.conn.clone();
        let job_name = job_name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM job_log WHERE (?1 = '' OR jobName = ?1)",
                rusqlite::params![job_name],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await?
    }

    // ─── Writes ───────────────────────────────────

    /// Delete every record of `job_name`. Returns the number removed.
    pub async fn delete_by_job(&self, job_name: &str) -> Result<u64> {
        let conn = self.conn.clone();
        let job_name = job_name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let removed = conn.execute(
                "DELETE FROM job_log WHERE jobName = ?1",
                rusqlite::params![job_name],
            )?;
            tracing::debug!(job = %job_name, removed, "log records deleted");
            Ok(removed as u64)
        })
        .await?
    }

    /// Insert a batch of records. Returns the number inserted.
    ///
    /// There is no enclosing transaction: when an insert fails, records
    /// already written stay and the error reports how many were accepted.
    pub async fn insert_batch(&self, records: Vec<LogRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare_cached(
                "INSERT INTO job_log
                    (jobName, command, err, output, planTime, scheduleTime, startTime, endTime, workIp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (inserted, record) in records.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    record.job_name,
                    record.command,
                    record.err,
                    record.output,
                    record.plan_time,
                    record.schedule_time,
                    record.start_time,
                    record.end_time,
                    record.work_ip,
                ])
                .map_err(|source| StorageError::PartialBatch { inserted, source })?;
            }
            Ok(records.len())
        })
        .await?
    }
}

fn decode_row(row: &Row<'_>) -> rusqlite::Result<LogRecord> {
    Ok(LogRecord {
        job_name: row.get(0)?,
        command: row.get(1)?,
        err: row.get(2)?,
        output: row.get(3)?,
        plan_time: row.get(4)?,
        schedule_time: row.get(5)?,
        start_time: row.get(6)?,
        end_time: row.get(7)?,
        work_ip: row.get(8)?,
    })
}

fn is_decode_error(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::Utf8Error(..)
    )
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
