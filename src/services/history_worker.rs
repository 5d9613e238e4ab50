//! History worker - persists settled sessions off the polling thread
//!
//! All appends are serialized through this one worker. A failing store is
//! retried with exponential backoff; once retries are exhausted the record is
//! given up on and clients get a degraded-mode notice instead of the process
//! going down.

use crate::domain::ports::HistoryStore;
use crate::domain::types::{HistoryRecord, Notification};
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Backoff never grows past this
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total append attempts per record (at least one)
    pub attempts: u32,
    /// Delay before the first retry; doubles after each failure
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 5, base_delay: Duration::from_millis(200) }
    }
}

pub struct HistoryWorker {
    store: Arc<dyn HistoryStore>,
    rx: mpsc::Receiver<HistoryRecord>,
    /// Degraded-mode notices
    notify_tx: mpsc::Sender<Notification>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl HistoryWorker {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        rx: mpsc::Receiver<HistoryRecord>,
        notify_tx: mpsc::Sender<Notification>,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, rx, notify_tx, retry, metrics }
    }

    /// Run the worker, persisting records until the channel closes
    pub async fn run(mut self) {
        info!(attempts = %self.retry.attempts, "history_worker_started");

        while let Some(record) = self.rx.recv().await {
            self.persist(record).await;
        }

        info!("history_worker_stopped");
    }

    /// Append one record, retrying on failure. Returns whether it was stored.
    async fn persist(&self, record: HistoryRecord) -> bool {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            // Appends are idempotent by session_id, so a retry after an
            // ambiguous failure cannot duplicate the record
            match self.store.append(record.clone()).await {
                Ok(id) => {
                    self.metrics.record_history_appended();
                    info!(
                        record_id = %id,
                        session_id = %record.session_id,
                        slot = %record.slot_id,
                        charge = %record.charge,
                        flagged = %record.flagged,
                        "history_appended"
                    );
                    return true;
                }
                Err(e) if attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    self.metrics.record_history_retry();
                    warn!(
                        session_id = %record.session_id,
                        attempt = %attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "history_append_retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.metrics.record_history_failure();
                    error!(
                        session_id = %record.session_id,
                        slot = %record.slot_id,
                        entry_time = %record.entry_time,
                        exit_time = %record.exit_time,
                        charge = %record.charge,
                        attempts = %attempts,
                        error = %e,
                        "history_append_failed"
                    );
                    let notice = Notification::info(&format!(
                        "History unavailable: session for slot {} (charge Rs. {}) was not saved",
                        record.slot_id, record.charge
                    ));
                    if self.notify_tx.try_send(notice).is_err() {
                        self.metrics.record_notification_dropped();
                    }
                    return false;
                }
            }
        }
    }
}

/// Create a history channel and worker
///
/// Returns the sender (for the dispatcher) and the worker (to be spawned)
pub fn create_history_worker(
    store: Arc<dyn HistoryStore>,
    notify_tx: mpsc::Sender<Notification>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<HistoryRecord>, HistoryWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (tx, HistoryWorker::new(store, rx, notify_tx, retry, metrics))
}
