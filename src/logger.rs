//! Buffered batch logging on top of [`FileStore`].
//!
//! `RunLogger` owns a background tokio task that holds the buffer.
//! `log_metric()`/`log_param()`/`set_tag()` are channel sends that never
//! block the experiment process; the task groups buffered entries into
//! `FileStore::log_batch` calls, flushing when the buffer fills or on a
//! timer. The lifecycle is explicit: `flush()` forces a write-out and
//! `close(status)` drains the buffer and records the terminal status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{error, info};

use crate::error::{Result, StoreError};
use crate::models::{Metric, Param, RunStatus, RunTag};
use crate::store::FileStore;

/// Commands sent to the background logging task.
enum LogCommand {
    Metric(Metric),
    Param(Param),
    Tag(RunTag),
    /// Force flush the current buffer to disk.
    Flush(oneshot::Sender<Result<()>>),
    /// Flush everything, record the terminal status, stop.
    Shutdown {
        status: RunStatus,
        reply: oneshot::Sender<()>,
    },
}

/// Buffering configuration for a [`RunLogger`].
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Flush after this many buffered entries.
    pub flush_rows: usize,
    /// Flush at least every this many milliseconds.
    pub flush_ms: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            flush_rows: 50,
            flush_ms: 500,
        }
    }
}

/// Non-blocking batch logger for one run.
///
/// Internally holds a sender to a tokio mpsc channel; all store I/O happens
/// in a background task on a dedicated runtime thread.
pub struct RunLogger {
    sender: mpsc::UnboundedSender<LogCommand>,
    /// Keep the runtime alive as long as the logger exists.
    _runtime: Arc<Runtime>,
    run_id: String,
}

impl RunLogger {
    /// Attach a logger to an existing run. Fails fast if the run cannot be
    /// read.
    pub fn new(store: FileStore, run_id: impl Into<String>, config: LoggerConfig) -> Result<Self> {
        let run_id = run_id.into();
        store.get_run(&run_id)?;

        let runtime = Arc::new(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("trackstore-io")
                .enable_all()
                .build()
                .map_err(|e| StoreError::Internal(e.to_string()))?,
        );
        let (sender, receiver) = mpsc::unbounded_channel::<LogCommand>();
        runtime.spawn(background_task(receiver, store, run_id.clone(), config));

        info!(run = %run_id, "RunLogger initialized");
        Ok(Self {
            sender,
            _runtime: runtime,
            run_id,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Buffer a metric sample. Non-blocking; silently dropped after close.
    pub fn log_metric(&self, metric: Metric) {
        let _ = self.sender.send(LogCommand::Metric(metric));
    }

    /// Buffer a parameter. Non-blocking.
    pub fn log_param(&self, param: Param) {
        let _ = self.sender.send(LogCommand::Param(param));
    }

    /// Buffer a tag. Non-blocking.
    pub fn set_tag(&self, tag: RunTag) {
        let _ = self.sender.send(LogCommand::Tag(tag));
    }

    /// Force flush the buffer to disk. Awaits completion.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LogCommand::Flush(tx))
            .map_err(|_| StoreError::ChannelClosed)?;
        rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    /// Drain the buffer, record the terminal status and end time, stop the
    /// background task. Blocks until complete.
    pub fn close(&self, status: RunStatus) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(LogCommand::Shutdown { status, reply: tx })
            .is_ok()
        {
            let _ = self._runtime.block_on(rx);
        }
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        // Best-effort graceful shutdown; a no-op if close() already ran.
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(LogCommand::Shutdown {
                status: RunStatus::Finished,
                reply: tx,
            })
            .is_ok()
        {
            let _ = self
                ._runtime
                .block_on(async { tokio::time::timeout(Duration::from_secs(5), rx).await });
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn background_task(
    mut receiver: mpsc::UnboundedReceiver<LogCommand>,
    store: FileStore,
    run_id: String,
    config: LoggerConfig,
) {
    let mut metrics: Vec<Metric> = vec![];
    let mut params: Vec<Param> = vec![];
    let mut tags: Vec<RunTag> = vec![];
    let mut flush_ticker = interval(Duration::from_millis(config.flush_ms));
    flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            cmd = receiver.recv() => {
                match cmd {
                    None => {
                        let _ = flush(&store, &run_id, &mut metrics, &mut params, &mut tags);
                        break;
                    }
                    Some(LogCommand::Metric(metric)) => {
                        metrics.push(metric);
                        maybe_flush(&store, &run_id, &mut metrics, &mut params, &mut tags,
                                    config.flush_rows);
                    }
                    Some(LogCommand::Param(param)) => {
                        params.push(param);
                        maybe_flush(&store, &run_id, &mut metrics, &mut params, &mut tags,
                                    config.flush_rows);
                    }
                    Some(LogCommand::Tag(tag)) => {
                        tags.push(tag);
                        maybe_flush(&store, &run_id, &mut metrics, &mut params, &mut tags,
                                    config.flush_rows);
                    }
                    Some(LogCommand::Flush(reply)) => {
                        let result = flush(&store, &run_id, &mut metrics, &mut params, &mut tags);
                        let _ = reply.send(result);
                    }
                    Some(LogCommand::Shutdown { status, reply }) => {
                        let _ = flush(&store, &run_id, &mut metrics, &mut params, &mut tags);
                        let end_time = Utc::now().timestamp_millis();
                        if let Err(err) = store.update_run_info(&run_id, status, Some(end_time)) {
                            error!(run = %run_id, error = %err,
                                   "failed to record terminal run status");
                        }
                        let _ = reply.send(());
                        break;
                    }
                }
            }

            _ = flush_ticker.tick() => {
                if !(metrics.is_empty() && params.is_empty() && tags.is_empty()) {
                    let _ = flush(&store, &run_id, &mut metrics, &mut params, &mut tags);
                }
            }
        }
    }
}

fn maybe_flush(
    store: &FileStore,
    run_id: &str,
    metrics: &mut Vec<Metric>,
    params: &mut Vec<Param>,
    tags: &mut Vec<RunTag>,
    flush_rows: usize,
) {
    if metrics.len() + params.len() + tags.len() >= flush_rows {
        let _ = flush(store, run_id, metrics, params, tags);
    }
}

/// Write the buffered entries as one batch. The buffer is cleared either way:
/// the store does not roll back partial batches, so retrying a failed batch
/// could double-apply metrics.
fn flush(
    store: &FileStore,
    run_id: &str,
    metrics: &mut Vec<Metric>,
    params: &mut Vec<Param>,
    tags: &mut Vec<RunTag>,
) -> Result<()> {
    if metrics.is_empty() && params.is_empty() && tags.is_empty() {
        return Ok(());
    }
    let result = store.log_batch(run_id, metrics, params, tags);
    metrics.clear();
    params.clear();
    tags.clear();
    if let Err(err) = &result {
        error!(run = %run_id, error = %err, "failed to flush batch");
    }
    result
}
