//! Per-slot occupancy state machine
//!
//! Turns debounced presence readings into committed slot state and
//! arrival/departure events. One machine per slot, advanced only by the
//! polling driver, so no internal locking.
//!
//! Key behaviors:
//! - The first committed reading seeds Vacant/Occupied without an event
//! - Vacant -> Occupied emits `Arrived` and records the transition time
//! - Occupied -> Vacant emits `Departed` only when the entry time is known
//!   (a car parked before startup leaves silently)
//! - Repeated identical readings are no-ops

use crate::domain::types::{Occupancy, OccupancyReading, Slot, SlotEvent, SlotId};
use crate::services::debounce::{Committed, Debouncer};
use tracing::debug;

/// Result of a committed change in slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Slot state after the change (to be published to the shared store)
    pub state: Slot,
    pub event: Option<SlotEvent>,
}

#[derive(Debug, Clone)]
pub struct OccupancyStateMachine {
    slot: SlotId,
    debouncer: Debouncer<bool, u64>,
    state: Slot,
}

impl OccupancyStateMachine {
    pub fn new(slot: SlotId, debounce_samples: u32) -> Self {
        Self { slot, debouncer: Debouncer::new(debounce_samples), state: Slot::UNKNOWN }
    }

    /// Feed one raw reading taken at `now` (epoch seconds).
    ///
    /// Returns `Some` only when the committed state changes.
    pub fn observe(&mut self, reading: OccupancyReading, now: u64) -> Option<Transition> {
        let Committed { value: occupied, since } = self.debouncer.observe(reading.occupied, now)?;
        let previous = self.state;

        let event = match (previous.occupancy, occupied) {
            (Occupancy::Unknown, _) => {
                self.state.occupancy =
                    if occupied { Occupancy::Occupied } else { Occupancy::Vacant };
                debug!(slot = %self.slot, occupancy = %self.state.occupancy.as_str(), "slot_initialized");
                None
            }
            (Occupancy::Vacant, true) => {
                self.state = Slot { occupancy: Occupancy::Occupied, last_transition_time: Some(since) };
                Some(SlotEvent::Arrived { slot: self.slot, at: since })
            }
            (Occupancy::Occupied, false) => {
                self.state = Slot { occupancy: Occupancy::Vacant, last_transition_time: Some(since) };
                match previous.last_transition_time {
                    Some(entry_time) => {
                        Some(SlotEvent::Departed { slot: self.slot, entry_time, exit_time: since })
                    }
                    None => {
                        debug!(slot = %self.slot, "slot_departed_without_entry_time");
                        None
                    }
                }
            }
            _ => return None,
        };

        Some(Transition { state: self.state, event })
    }

    #[inline]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    #[inline]
    pub fn state(&self) -> Slot {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OCC: OccupancyReading = OccupancyReading::OCCUPIED;
    const VAC: OccupancyReading = OccupancyReading::VACANT;

    fn machine() -> OccupancyStateMachine {
        OccupancyStateMachine::new(SlotId(1), 1)
    }

    /// Reference fold of the transition table over committed readings
    fn fold(readings: &[bool]) -> Occupancy {
        readings.iter().fold(Occupancy::Unknown, |_, &r| {
            if r {
                Occupancy::Occupied
            } else {
                Occupancy::Vacant
            }
        })
    }

    #[test]
    fn test_first_reading_seeds_state_without_event() {
        let mut m = machine();
        let t = m.observe(VAC, 100).unwrap();
        assert_eq!(t.state.occupancy, Occupancy::Vacant);
        assert_eq!(t.state.last_transition_time, None);
        assert_eq!(t.event, None);
    }

    #[test]
    fn test_vacant_to_occupied_emits_arrived() {
        let mut m = machine();
        m.observe(VAC, 100);
        let t = m.observe(OCC, 120).unwrap();
        assert_eq!(t.state.occupancy, Occupancy::Occupied);
        assert_eq!(t.state.last_transition_time, Some(120));
        assert_eq!(t.event, Some(SlotEvent::Arrived { slot: SlotId(1), at: 120 }));
    }

    #[test]
    fn test_occupied_to_vacant_emits_departed_with_entry_time() {
        let mut m = machine();
        m.observe(VAC, 900);
        m.observe(OCC, 1000);
        let t = m.observe(VAC, 1050).unwrap();
        assert_eq!(t.state.occupancy, Occupancy::Vacant);
        assert_eq!(t.state.last_transition_time, Some(1050));
        assert_eq!(
            t.event,
            Some(SlotEvent::Departed { slot: SlotId(1), entry_time: 1000, exit_time: 1050 })
        );
    }

    #[test]
    fn test_departure_without_known_entry_is_silent() {
        let mut m = machine();
        // Occupied since before startup
        m.observe(OCC, 100);
        let t = m.observe(VAC, 200).unwrap();
        assert_eq!(t.event, None);
        assert_eq!(t.state.occupancy, Occupancy::Vacant);
        assert_eq!(t.state.last_transition_time, Some(200));

        // Next cycle is fully accounted
        m.observe(OCC, 300);
        let t = m.observe(VAC, 360).unwrap();
        assert_eq!(
            t.event,
            Some(SlotEvent::Departed { slot: SlotId(1), entry_time: 300, exit_time: 360 })
        );
    }

    #[test]
    fn test_repeated_reading_is_idempotent() {
        let mut m = machine();
        m.observe(VAC, 100);
        m.observe(OCC, 110);
        assert_eq!(m.observe(OCC, 120), None);
        assert_eq!(m.observe(OCC, 130), None);
        assert_eq!(m.state().last_transition_time, Some(110));
    }

    #[test]
    fn test_state_matches_fold_over_readings() {
        let sequences: [&[bool]; 4] = [
            &[true],
            &[false, true, false],
            &[true, true, false, false, true],
            &[false, false, true, true, true, false, true, false],
        ];
        for seq in sequences {
            let mut m = machine();
            for (t, &r) in seq.iter().enumerate() {
                m.observe(OccupancyReading { occupied: r }, t as u64);
            }
            assert_eq!(m.state().occupancy, fold(seq), "sequence {:?}", seq);
        }
    }

    #[test]
    fn test_departed_iff_prior_occupied_with_entry() {
        let seq = [false, true, true, false, false, true, false];
        let mut m = machine();
        let mut departures = Vec::new();
        for (t, &r) in seq.iter().enumerate() {
            if let Some(Transition { event: Some(SlotEvent::Departed { entry_time, exit_time, .. }), .. }) =
                m.observe(OccupancyReading { occupied: r }, t as u64)
            {
                departures.push((entry_time, exit_time));
            }
        }
        assert_eq!(departures, vec![(1, 3), (5, 6)]);
    }

    #[test]
    fn test_debounced_flicker_produces_no_event() {
        let mut m = OccupancyStateMachine::new(SlotId(2), 3);
        let mut events = Vec::new();
        let samples = [false, false, false, true, false, false, false];
        for (t, &r) in samples.iter().enumerate() {
            if let Some(t) = m.observe(OccupancyReading { occupied: r }, t as u64) {
                events.extend(t.event);
            }
        }
        assert!(events.is_empty());
        assert_eq!(m.state().occupancy, Occupancy::Vacant);
    }

    #[test]
    fn test_debounced_arrival_uses_first_sample_time() {
        let mut m = OccupancyStateMachine::new(SlotId(2), 3);
        for t in 0..3 {
            m.observe(VAC, t);
        }
        assert_eq!(m.observe(OCC, 10), None);
        assert_eq!(m.observe(OCC, 11), None);
        let t = m.observe(OCC, 12).unwrap();
        assert_eq!(t.event, Some(SlotEvent::Arrived { slot: SlotId(2), at: 10 }));
    }
}
