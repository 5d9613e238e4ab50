//! Shared types for the parking controller

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch seconds
#[inline]
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Newtype wrapper for slot ids to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SlotId(pub u8);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for history record ids (assigned by the history store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One normalized sample from a presence sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyReading {
    pub occupied: bool,
}

impl OccupancyReading {
    pub const OCCUPIED: Self = Self { occupied: true };
    pub const VACANT: Self = Self { occupied: false };
}

/// Committed occupancy of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Unknown,
    Vacant,
    Occupied,
}

impl Occupancy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Occupancy::Unknown => "unknown",
            Occupancy::Vacant => "vacant",
            Occupancy::Occupied => "occupied",
        }
    }

    /// `None` while unknown, otherwise whether the slot is occupied
    pub fn is_occupied(&self) -> Option<bool> {
        match self {
            Occupancy::Unknown => None,
            Occupancy::Vacant => Some(false),
            Occupancy::Occupied => Some(true),
        }
    }
}

/// Current state of one slot as seen by readers of the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub occupancy: Occupancy,
    /// Epoch seconds of the last committed arrival/departure
    pub last_transition_time: Option<u64>,
}

impl Slot {
    pub const UNKNOWN: Self = Self { occupancy: Occupancy::Unknown, last_transition_time: None };
}

/// Domain event produced by a slot's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    Arrived { slot: SlotId, at: u64 },
    Departed { slot: SlotId, entry_time: u64, exit_time: u64 },
}

/// One completed parking session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unique per departure; appends with a known session id are no-ops
    pub session_id: String,
    pub slot_id: SlotId,
    pub entry_time: u64,
    pub exit_time: u64,
    pub charge: u64,
    /// Set when exit preceded entry and the charge was clamped
    #[serde(default)]
    pub flagged: bool,
}

/// A history record together with the id the store assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: HistoryRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Arrival,
    Departure,
    Gate,
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Arrival => "arrival",
            NotificationKind::Departure => "departure",
            NotificationKind::Gate => "gate",
            NotificationKind::Info => "info",
        }
    }
}

/// Human-readable event announced to connected clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge: Option<u64>,
    pub text: String,
}

impl Notification {
    pub fn arrival(slot: SlotId) -> Self {
        Self {
            kind: NotificationKind::Arrival,
            slot: Some(slot),
            charge: None,
            text: format!("Vehicle {} has arrived", slot),
        }
    }

    pub fn departure(slot: SlotId, charge: u64) -> Self {
        Self {
            kind: NotificationKind::Departure,
            slot: Some(slot),
            charge: Some(charge),
            text: format!("Vehicle {} has left, Charge: Rs. {}", slot, charge),
        }
    }

    pub fn gate(text: &str) -> Self {
        Self { kind: NotificationKind::Gate, slot: None, charge: None, text: text.to_string() }
    }

    pub fn info(text: &str) -> Self {
        Self { kind: NotificationKind::Info, slot: None, charge: None, text: text.to_string() }
    }
}
