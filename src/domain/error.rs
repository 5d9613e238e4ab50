//! Error types at the library seams

use crate::domain::types::RecordId;
use thiserror::Error;

/// Failure to obtain a reading from a presence sensor
#[derive(Debug, Error)]
pub enum SensorError {
    /// The echo edge never arrived within the bound
    #[error("echo {phase} not seen within {timeout_ms} ms")]
    EchoTimeout { phase: &'static str, timeout_ms: u64 },
    #[error("gpio access failed: {0}")]
    Gpio(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("history record {0} not found")]
    NotFound(RecordId),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}
