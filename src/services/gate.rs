//! Gate interlock state machine
//!
//! Closed -> Opening -> Open -> Closing -> Closed, driven by elapsed-time
//! checks on every poll rather than blocking waits. A cycle runs to completion
//! once started; triggers seen while the gate is not Closed are ignored.
//!
//! The trigger latch is set when a cycle starts and only clears once the
//! trigger sensor reports inactive while Closed, so one vehicle lingering in
//! the trigger zone cannot fire the gate twice.

use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Closed => "closed",
            GateState::Opening => "opening",
            GateState::Open => "open",
            GateState::Closing => "closing",
        }
    }
}

/// Command sent to the physical actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMotion {
    Open,
    Close,
    Stop,
}

/// Drives the gate motor
pub trait GateActuator: Send {
    fn drive(&mut self, motion: GateMotion) -> std::io::Result<()>;
}

/// Fixed phase durations of one gate cycle
#[derive(Debug, Clone, Copy)]
pub struct GateTiming {
    /// Actuator runs open for this long
    pub open_pulse: Duration,
    /// Gate stays open for this long
    pub dwell: Duration,
    /// Actuator runs closed for this long
    pub close_pulse: Duration,
}

impl Default for GateTiming {
    fn default() -> Self {
        Self {
            open_pulse: Duration::from_millis(1000),
            dwell: Duration::from_millis(5000),
            close_pulse: Duration::from_millis(1000),
        }
    }
}

/// What a single `step` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    Opening,
    Opened,
    Closing,
    Closed,
    /// Trigger fired with every slot taken; gate stays shut
    NoSpots,
}

pub struct GateController {
    state: GateState,
    phase_started: Instant,
    trigger_latched: bool,
    /// "No spots" already announced for the current trigger presence
    no_spots_announced: bool,
    timing: GateTiming,
    actuator: Box<dyn GateActuator>,
}

impl GateController {
    pub fn new(timing: GateTiming, actuator: Box<dyn GateActuator>, now: Instant) -> Self {
        Self {
            state: GateState::Closed,
            phase_started: now,
            trigger_latched: false,
            no_spots_announced: false,
            timing,
            actuator,
        }
    }

    /// Advance the gate by one poll.
    ///
    /// `trigger_active` is the debounced trigger sensor level, `any_vacant`
    /// whether any slot is currently free.
    pub fn step(&mut self, trigger_active: bool, any_vacant: bool, now: Instant) -> Option<GateEvent> {
        let elapsed = now.saturating_duration_since(self.phase_started);

        match self.state {
            GateState::Closed => {
                if !trigger_active {
                    self.trigger_latched = false;
                    self.no_spots_announced = false;
                    return None;
                }
                if self.trigger_latched {
                    return None;
                }
                if any_vacant {
                    self.trigger_latched = true;
                    self.no_spots_announced = false;
                    self.enter(GateState::Opening, GateMotion::Open, now);
                    return Some(GateEvent::Opening);
                }
                if !self.no_spots_announced {
                    self.no_spots_announced = true;
                    info!("gate_no_spots_available");
                    return Some(GateEvent::NoSpots);
                }
                None
            }
            GateState::Opening if elapsed >= self.timing.open_pulse => {
                self.enter(GateState::Open, GateMotion::Stop, now);
                Some(GateEvent::Opened)
            }
            GateState::Open if elapsed >= self.timing.dwell => {
                self.enter(GateState::Closing, GateMotion::Close, now);
                Some(GateEvent::Closing)
            }
            GateState::Closing if elapsed >= self.timing.close_pulse => {
                self.enter(GateState::Closed, GateMotion::Stop, now);
                Some(GateEvent::Closed)
            }
            _ => None,
        }
    }

    fn enter(&mut self, state: GateState, motion: GateMotion, now: Instant) {
        let from = self.state;
        self.state = state;
        self.phase_started = now;

        // Timed sequence continues even if the motor driver rejects a command
        if let Err(e) = self.actuator.drive(motion) {
            error!(error = %e, motion = ?motion, "gate_actuator_failed");
        }
        info!(from = %from.as_str(), to = %state.as_str(), "gate_state_changed");
    }

    #[inline]
    pub fn state(&self) -> GateState {
        self.state
    }

    #[inline]
    pub fn trigger_latched(&self) -> bool {
        self.trigger_latched
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Actuator that records every motion it is asked to perform
    #[derive(Clone, Default)]
    pub(crate) struct RecordingActuator {
        pub motions: Arc<Mutex<Vec<GateMotion>>>,
    }

    impl GateActuator for RecordingActuator {
        fn drive(&mut self, motion: GateMotion) -> std::io::Result<()> {
            self.motions.lock().push(motion);
            Ok(())
        }
    }

    struct FailingActuator;

    impl GateActuator for FailingActuator {
        fn drive(&mut self, _motion: GateMotion) -> std::io::Result<()> {
            Err(std::io::Error::other("motor driver offline"))
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn timing() -> GateTiming {
        GateTiming { open_pulse: ms(500), dwell: ms(2000), close_pulse: ms(500) }
    }

    fn gate(t0: Instant) -> (GateController, RecordingActuator) {
        let actuator = RecordingActuator::default();
        (GateController::new(timing(), Box::new(actuator.clone()), t0), actuator)
    }

    #[test]
    fn test_no_spots_keeps_gate_closed() {
        let t0 = Instant::now();
        let (mut gate, actuator) = gate(t0);

        assert_eq!(gate.step(true, false, t0), Some(GateEvent::NoSpots));
        // Announced once per trigger presence
        assert_eq!(gate.step(true, false, t0 + ms(100)), None);
        assert_eq!(gate.state(), GateState::Closed);
        assert!(actuator.motions.lock().is_empty());

        // Vehicle leaves the trigger, a new one arrives: announced again
        assert_eq!(gate.step(false, false, t0 + ms(200)), None);
        assert_eq!(gate.step(true, false, t0 + ms(300)), Some(GateEvent::NoSpots));
    }

    #[test]
    fn test_waiting_vehicle_admitted_when_spot_frees() {
        let t0 = Instant::now();
        let (mut gate, _) = gate(t0);

        assert_eq!(gate.step(true, false, t0), Some(GateEvent::NoSpots));
        assert_eq!(gate.step(true, true, t0 + ms(100)), Some(GateEvent::Opening));
    }

    #[test]
    fn test_full_cycle() {
        let t0 = Instant::now();
        let (mut gate, actuator) = gate(t0);

        assert_eq!(gate.step(true, true, t0), Some(GateEvent::Opening));
        assert_eq!(gate.state(), GateState::Opening);
        assert!(gate.trigger_latched());

        assert_eq!(gate.step(true, true, t0 + ms(499)), None);
        assert_eq!(gate.step(true, true, t0 + ms(500)), Some(GateEvent::Opened));
        assert_eq!(gate.state(), GateState::Open);

        assert_eq!(gate.step(false, true, t0 + ms(2499)), None);
        assert_eq!(gate.step(false, true, t0 + ms(2500)), Some(GateEvent::Closing));
        assert_eq!(gate.state(), GateState::Closing);

        assert_eq!(gate.step(false, true, t0 + ms(3000)), Some(GateEvent::Closed));
        assert_eq!(gate.state(), GateState::Closed);

        assert_eq!(
            *actuator.motions.lock(),
            vec![GateMotion::Open, GateMotion::Stop, GateMotion::Close, GateMotion::Stop]
        );
    }

    #[test]
    fn test_triggers_ignored_mid_cycle() {
        let t0 = Instant::now();
        let (mut gate, actuator) = gate(t0);

        gate.step(true, true, t0);
        for i in 1..5 {
            let now = t0 + ms(i * 50);
            gate.step(false, true, now);
            assert_eq!(gate.step(true, true, now), None);
            assert_eq!(gate.state(), GateState::Opening);
        }
        assert_eq!(actuator.motions.lock().len(), 1);
    }

    #[test]
    fn test_latch_requires_trigger_to_clear_after_cycle() {
        let t0 = Instant::now();
        let (mut gate, _) = gate(t0);

        gate.step(true, true, t0);
        gate.step(true, true, t0 + ms(500));
        gate.step(true, true, t0 + ms(2500));
        assert_eq!(gate.step(true, true, t0 + ms(3000)), Some(GateEvent::Closed));

        // Same vehicle still on the trigger: no second cycle
        assert_eq!(gate.step(true, true, t0 + ms(3100)), None);
        assert_eq!(gate.state(), GateState::Closed);

        // Trigger clears, next vehicle starts a fresh cycle
        assert_eq!(gate.step(false, true, t0 + ms(3200)), None);
        assert!(!gate.trigger_latched());
        assert_eq!(gate.step(true, true, t0 + ms(3300)), Some(GateEvent::Opening));
    }

    #[test]
    fn test_actuator_failure_does_not_stall_cycle() {
        let t0 = Instant::now();
        let mut gate = GateController::new(timing(), Box::new(FailingActuator), t0);

        assert_eq!(gate.step(true, true, t0), Some(GateEvent::Opening));
        assert_eq!(gate.step(true, true, t0 + ms(500)), Some(GateEvent::Opened));
        assert_eq!(gate.step(true, true, t0 + ms(2500)), Some(GateEvent::Closing));
        assert_eq!(gate.step(true, true, t0 + ms(3000)), Some(GateEvent::Closed));
    }
}
