//! Asynchronous, batched soft deletion.
//!
//! Request handlers push [`DeleteTask`]s into a bounded queue. A single
//! background task accumulates their codes and hands them to a
//! [`DeleteSink`] on every tick. A failed flush keeps the codes for the next
//! tick. When every queue handle is dropped the task flushes once more and
//! exits.

use crate::error::{Result, ShortenerError};
use async_trait::async_trait;
use snip_core::{Deadline, DeleteTask, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FLUSH_BUDGET: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineSettings {
    /// Tasks the queue holds before `enqueue` starts waiting.
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub capacity: usize,
    #[builder(default = DEFAULT_FLUSH_INTERVAL)]
    pub flush_interval: Duration,
    /// Deadline given to each flush.
    #[builder(default = DEFAULT_FLUSH_BUDGET)]
    pub flush_budget: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Destination of accumulated deletions.
#[async_trait]
pub trait DeleteSink: Send + Sync + 'static {
    async fn flush(&self, deadline: Deadline, short_codes: &[String]) -> snip_core::error::Result<()>;
}

/// Flushes into a storage backend's `delete_urls`.
pub struct StorageSink(pub Arc<dyn Storage>);

#[async_trait]
impl DeleteSink for StorageSink {
    async fn flush(&self, deadline: Deadline, short_codes: &[String]) -> snip_core::error::Result<()> {
        self.0.delete_urls(deadline, short_codes).await
    }
}

/// Sending half of the deletion queue.
#[derive(Debug, Clone)]
pub struct DeleteQueue {
    tx: mpsc::Sender<DeleteTask>,
}

impl DeleteQueue {
    /// Waits for queue capacity, then hands the task to the flush loop.
    pub async fn enqueue(&self, task: DeleteTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| ShortenerError::QueueClosed)
    }
}

/// Starts the flush loop. It runs until every [`DeleteQueue`] clone is dropped.
pub fn spawn(sink: Arc<dyn DeleteSink>, settings: PipelineSettings) -> (DeleteQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(settings.capacity.max(1));
    let handle = tokio::spawn(run(rx, sink, settings));
    (DeleteQueue { tx }, handle)
}

async fn run(
    mut rx: mpsc::Receiver<DeleteTask>,
    sink: Arc<dyn DeleteSink>,
    settings: PipelineSettings,
) {
    let mut pending: Vec<String> = Vec::new();
    let mut ticker = interval_at(
        Instant::now() + settings.flush_interval,
        settings.flush_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        capacity = settings.capacity,
        flush_interval = ?settings.flush_interval,
        "deletion pipeline started"
    );

    loop {
        tokio::select! {
            task = rx.recv() => match task {
                Some(task) => {
                    debug!(
                        user_id = task.user_id,
                        codes = task.short_codes.len(),
                        enqueued_at = %task.enqueued_at,
                        "delete task received"
                    );
                    pending.extend(task.short_codes);
                }
                None => {
                    if !flush(sink.as_ref(), &mut pending, settings.flush_budget).await {
                        error!(codes = pending.len(), "final flush failed, deletions dropped");
                    }
                    info!("deletion pipeline stopped");
                    return;
                }
            },
            _ = ticker.tick() => {
                flush(sink.as_ref(), &mut pending, settings.flush_budget).await;
            }
        }
    }
}

/// Returns `false` if codes remain pending.
async fn flush(sink: &dyn DeleteSink, pending: &mut Vec<String>, budget: Duration) -> bool {
    if pending.is_empty() {
        return true;
    }

    match sink.flush(Deadline::after(budget), pending).await {
        Ok(()) => {
            debug!(codes = pending.len(), "deletions flushed");
            pending.clear();
            true
        }
        Err(err) => {
            warn!(error = %err, codes = pending.len(), "flush failed, retrying on next tick");
            false
        }
    }
}
