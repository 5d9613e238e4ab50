//! Hand-off from the polling thread to the async workers
//!
//! The polling thread must never block on storage or the network, so every
//! side effect goes through a bounded queue with `try_send`. A full queue drops
//! the item, counts it, and logs; the poll loop carries on.

use crate::domain::types::{HistoryRecord, Notification};
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, warn};

#[derive(Clone)]
pub struct EventDispatcher {
    history_tx: mpsc::Sender<HistoryRecord>,
    notify_tx: mpsc::Sender<Notification>,
    metrics: Arc<Metrics>,
}

impl EventDispatcher {
    pub fn new(
        history_tx: mpsc::Sender<HistoryRecord>,
        notify_tx: mpsc::Sender<Notification>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { history_tx, notify_tx, metrics }
    }

    /// Queue a settled session for persistence
    pub fn record_history(&self, record: HistoryRecord) {
        match self.history_tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                self.metrics.record_history_dropped();
                error!(
                    session_id = %record.session_id,
                    slot = %record.slot_id,
                    charge = %record.charge,
                    "history_queue_full_record_dropped"
                );
            }
            Err(TrySendError::Closed(record)) => {
                self.metrics.record_history_dropped();
                warn!(session_id = %record.session_id, "history_queue_closed");
            }
        }
    }

    /// Queue a notification for delivery
    pub fn notify(&self, notification: Notification) {
        match self.notify_tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                self.metrics.record_notification_dropped();
                warn!(kind = %n.kind.as_str(), text = %n.text, "notify_queue_full_dropped");
            }
            Err(TrySendError::Closed(n)) => {
                self.metrics.record_notification_dropped();
                warn!(kind = %n.kind.as_str(), "notify_queue_closed");
            }
        }
    }
}
