//! Collaborator interfaces the core calls into
//!
//! Implementations live in `io/` (JSONL/in-memory history, MQTT notifications).

use crate::domain::error::{HistoryError, NotifyError};
use crate::domain::types::{HistoryRecord, Notification, RecordId, StoredRecord};
use async_trait::async_trait;

/// Append/query/delete store for completed parking sessions
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a record and return its id.
    ///
    /// Appending a record whose `session_id` is already stored returns the
    /// existing id without writing a duplicate.
    async fn append(&self, record: HistoryRecord) -> Result<RecordId, HistoryError>;

    /// All stored records, most recent first
    async fn query_all(&self) -> Result<Vec<StoredRecord>, HistoryError>;

    async fn delete(&self, id: RecordId) -> Result<(), HistoryError>;
}

/// Fan-out of human-readable events to connected clients
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}
