//! Buffered writer that ships log records to the store in batches.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use cronmesh_types::LogRecord;

use crate::LogStore;

/// Records buffered between the executor and the flushing task.
const CHANNEL_CAPACITY: usize = 1000;

/// Handle for appending records to a background batching task.
///
/// The task flushes when a batch is full or when the commit timeout
/// elapses after the batch's first record. Dropping every handle flushes
/// what is pending and ends the task.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogRecord>,
}

impl LogSink {
    pub fn spawn(
        store: Arc<LogStore>,
        batch_size: usize,
        commit_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(run(store, rx, batch_size.max(1), commit_timeout));
        (Self { tx }, handle)
    }

    /// Queue a record without waiting. Returns `false` if it was dropped.
    pub fn append(&self, record: LogRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                warn!(job = %record.job_name, "log sink full, dropping record");
                false
            }
            Err(TrySendError::Closed(record)) => {
                warn!(job = %record.job_name, "log sink closed, dropping record");
                false
            }
        }
    }

    /// Queue a record, waiting for buffer space. Returns `false` if the sink stopped.
    pub async fn send(&self, record: LogRecord) -> bool {
        self.tx.send(record).await.is_ok()
    }
}

async fn run(
    store: Arc<LogStore>,
    mut rx: mpsc::Receiver<LogRecord>,
    batch_size: usize,
    commit_timeout: Duration,
) {
    let mut batch: Vec<LogRecord> = Vec::with_capacity(batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(record) => {
                    if batch.is_empty() {
                        deadline = Some(Instant::now() + commit_timeout);
                    }
                    batch.push(record);
                    if batch.len() >= batch_size {
                        flush(&store, &mut batch).await;
                        deadline = None;
                    }
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                flush(&store, &mut batch).await;
                deadline = None;
            }
        }
    }

    flush(&store, &mut batch).await;
    debug!("log sink stopped");
}

async fn flush(store: &LogStore, batch: &mut Vec<LogRecord>) {
    if batch.is_empty() {
        return;
    }
    let records = std::mem::take(batch);
    let total = records.len();
    match store.insert_batch(records).await {
        Ok(inserted) => debug!(inserted, "log batch flushed"),
        Err(e) => warn!(total, "log batch flush failed: {e}"),
    }
}
