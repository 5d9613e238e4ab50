//! Domain models - core parking types and collaborator interfaces
//!
//! This module contains the canonical data types used throughout the system:
//! - `Slot` / `Occupancy` - committed per-slot state
//! - `SlotEvent` - arrivals and departures emitted by the state machines
//! - `HistoryRecord` - one completed parking session
//! - `Notification` - human-readable event for clients
//! - `HistoryStore` / `NotificationSink` - interfaces implemented in `io/`

pub mod error;
pub mod ports;
pub mod types;

// Re-export commonly used types at module level
pub use error::{HistoryError, NotifyError, SensorError};
pub use ports::{HistoryStore, NotificationSink};
pub use types::{
    HistoryRecord, Notification, NotificationKind, Occupancy, OccupancyReading, RecordId, Slot,
    SlotEvent, SlotId, StoredRecord,
};
