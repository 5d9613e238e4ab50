//! Notification worker - delivers events to the sink off the polling thread
//!
//! Delivery is best effort: a failed notify is counted and logged at debug,
//! never retried.

use crate::domain::ports::NotificationSink;
use crate::domain::types::Notification;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct NotifyWorker {
    sink: Arc<dyn NotificationSink>,
    rx: mpsc::Receiver<Notification>,
    metrics: Arc<Metrics>,
}

impl NotifyWorker {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        rx: mpsc::Receiver<Notification>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sink, rx, metrics }
    }

    /// Run the worker until every sender is gone
    pub async fn run(mut self) {
        info!("notify_worker_started");

        while let Some(notification) = self.rx.recv().await {
            match self.sink.notify(&notification).await {
                Ok(()) => {
                    self.metrics.record_notification(true);
                    debug!(kind = %notification.kind.as_str(), text = %notification.text, "notification_sent");
                }
                Err(e) => {
                    self.metrics.record_notification(false);
                    debug!(kind = %notification.kind.as_str(), error = %e, "notification_delivery_failed");
                }
            }
        }

        info!("notify_worker_stopped");
    }
}

/// Create a notification channel and worker
pub fn create_notify_worker(
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<Notification>, NotifyWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (tx, NotifyWorker::new(sink, rx, metrics))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::error::NotifyError;
    use crate::domain::types::SlotId;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Sink that keeps everything it is handed
    #[derive(Default)]
    pub(crate) struct CollectingSink {
        pub received: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSink for CollectingSink {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.received.lock().push(notification.clone());
            Ok(())
        }
    }

    struct OfflineSink;

    #[async_trait]
    impl NotificationSink for OfflineSink {
        async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("no route to broker".to_string()))
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let sink = Arc::new(CollectingSink::default());
        let (tx, worker) = create_notify_worker(sink.clone(), Arc::new(Metrics::new()), 8);

        tx.send(Notification::arrival(SlotId(1))).await.unwrap();
        tx.send(Notification::departure(SlotId(1), 40)).await.unwrap();
        drop(tx);
        worker.run().await;

        let texts: Vec<_> = sink.received.lock().iter().map(|n| n.text.clone()).collect();
        assert_eq!(texts, vec!["Vehicle 1 has arrived", "Vehicle 1 has left, Charge: Rs. 40"]);
    }

    #[tokio::test]
    async fn test_delivery_failures_are_swallowed() {
        let metrics = Arc::new(Metrics::new());
        let (tx, worker) = create_notify_worker(Arc::new(OfflineSink), metrics.clone(), 8);

        tx.send(Notification::info("a")).await.unwrap();
        tx.send(Notification::info("b")).await.unwrap();
        drop(tx);
        worker.run().await;

        assert_eq!(metrics.report().notifications_failed_total, 2);
    }
}
