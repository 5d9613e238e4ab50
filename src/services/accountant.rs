//! Session accounting - turns departures into history records

use crate::domain::types::{new_uuid_v7, HistoryRecord, SlotId};
use tracing::warn;

/// Pricing policy applied to the elapsed seconds of a session
pub trait Tariff: Send + Sync {
    fn price(&self, elapsed_secs: u64) -> u64;
}

/// Flat rate per elapsed second
#[derive(Debug, Clone, Copy)]
pub struct PerSecondTariff {
    pub rate_per_sec: u64,
}

impl Default for PerSecondTariff {
    fn default() -> Self {
        Self { rate_per_sec: 1 }
    }
}

impl Tariff for PerSecondTariff {
    fn price(&self, elapsed_secs: u64) -> u64 {
        elapsed_secs.saturating_mul(self.rate_per_sec)
    }
}

pub struct SessionAccountant {
    tariff: Box<dyn Tariff>,
}

impl SessionAccountant {
    pub fn new(tariff: Box<dyn Tariff>) -> Self {
        Self { tariff }
    }

    /// Charge for a session; zero when `exit_time` precedes `entry_time`
    pub fn charge(&self, entry_time: u64, exit_time: u64) -> u64 {
        match exit_time.checked_sub(entry_time) {
            Some(elapsed) => self.tariff.price(elapsed),
            None => 0,
        }
    }

    /// Build the history record for one departure
    pub fn settle(&self, slot_id: SlotId, entry_time: u64, exit_time: u64) -> HistoryRecord {
        let flagged = exit_time < entry_time;
        if flagged {
            warn!(
                slot = %slot_id,
                entry_time = %entry_time,
                exit_time = %exit_time,
                "session_clock_skew"
            );
        }

        HistoryRecord {
            session_id: new_uuid_v7(),
            slot_id,
            entry_time,
            exit_time,
            charge: self.charge(entry_time, exit_time),
            flagged,
        }
    }
}

impl Default for SessionAccountant {
    fn default() -> Self {
        Self::new(Box::new(PerSecondTariff::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_is_elapsed_seconds() {
        let accountant = SessionAccountant::default();
        assert_eq!(accountant.charge(1000, 1050), 50);
        assert_eq!(accountant.charge(1000, 1000), 0);
        for (entry, exit) in [(0, 1), (5, 3605), (1_700_000_000, 1_700_000_123)] {
            assert_eq!(accountant.charge(entry, exit), exit - entry);
        }
    }

    #[test]
    fn test_skewed_session_is_clamped_and_flagged() {
        let accountant = SessionAccountant::default();
        assert_eq!(accountant.charge(1050, 1000), 0);

        let record = accountant.settle(SlotId(3), 1050, 1000);
        assert_eq!(record.charge, 0);
        assert!(record.flagged);
    }

    #[test]
    fn test_settle_builds_record() {
        let accountant = SessionAccountant::default();
        let record = accountant.settle(SlotId(2), 1000, 1050);
        assert_eq!(record.slot_id, SlotId(2));
        assert_eq!(record.entry_time, 1000);
        assert_eq!(record.exit_time, 1050);
        assert_eq!(record.charge, 50);
        assert!(!record.flagged);
        assert!(!record.session_id.is_empty());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let accountant = SessionAccountant::default();
        let a = accountant.settle(SlotId(1), 0, 10);
        let b = accountant.settle(SlotId(1), 0, 10);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_custom_rate() {
        let accountant = SessionAccountant::new(Box::new(PerSecondTariff { rate_per_sec: 3 }));
        assert_eq!(accountant.charge(100, 110), 30);
    }
}
