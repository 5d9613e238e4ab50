//! Polling driver - the single writer of slot and gate state
//!
//! Each cycle samples every slot sensor in configuration order, feeds the
//! slot's state machine, publishes committed changes to the shared store, and
//! hands arrivals/departures to the dispatcher. The gate is stepped last so it
//! sees this cycle's vacancy. Runs on a dedicated OS thread because sensor
//! reads are blocking, timeout-bounded GPIO waits.

use crate::domain::types::{epoch_secs, Notification, Occupancy, SlotEvent, SlotId};
use crate::infra::metrics::{Metrics, GATE_STATE_CLOSED, GATE_STATE_MOVING, GATE_STATE_OPEN};
use crate::io::sensors::SensorSource;
use crate::services::accountant::SessionAccountant;
use crate::services::debounce::Debouncer;
use crate::services::dispatch::EventDispatcher;
use crate::services::gate::{GateController, GateEvent, GateState};
use crate::services::occupancy::OccupancyStateMachine;
use crate::services::state_store::SharedStateStore;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct SlotChannel {
    sensor: Box<dyn SensorSource>,
    machine: OccupancyStateMachine,
}

/// Trigger sensor plus the gate it drives
pub struct GateStation {
    trigger: Box<dyn SensorSource>,
    debouncer: Debouncer<bool, Instant>,
    controller: GateController,
}

impl GateStation {
    pub fn new(trigger: Box<dyn SensorSource>, debounce_samples: u32, controller: GateController) -> Self {
        Self { trigger, debouncer: Debouncer::new(debounce_samples), controller }
    }

    fn poll(&mut self, now: Instant, any_vacant: bool, dispatcher: &EventDispatcher, metrics: &Metrics) {
        match self.trigger.sample() {
            Ok(reading) => {
                if let Some(committed) = self.debouncer.observe(reading.occupied, now) {
                    debug!(active = %committed.value, "gate_trigger_changed");
                }
            }
            Err(e) => {
                // Hold the last committed level for this cycle
                metrics.record_sensor_error();
                warn!(error = %e, "gate_trigger_sample_failed");
            }
        }

        let trigger_active = self.debouncer.stable().unwrap_or(false);
        let Some(event) = self.controller.step(trigger_active, any_vacant, now) else {
            return;
        };

        metrics.set_gate_state(match self.controller.state() {
            GateState::Closed => GATE_STATE_CLOSED,
            GateState::Open => GATE_STATE_OPEN,
            GateState::Opening | GateState::Closing => GATE_STATE_MOVING,
        });

        let notification = match event {
            GateEvent::Opening => {
                metrics.record_gate_cycle();
                Notification::gate("Gate opening")
            }
            GateEvent::Opened => Notification::gate("Gate open"),
            GateEvent::Closing => Notification::gate("Gate closing"),
            GateEvent::Closed => Notification::gate("Gate closed"),
            GateEvent::NoSpots => {
                metrics.record_gate_no_spots();
                Notification::info("No spots available")
            }
        };
        dispatcher.notify(notification);
    }

    pub fn state(&self) -> GateState {
        self.controller.state()
    }
}

pub struct PollingDriver {
    slots: Vec<SlotChannel>,
    gate: Option<GateStation>,
    store: Arc<SharedStateStore>,
    accountant: SessionAccountant,
    dispatcher: EventDispatcher,
    metrics: Arc<Metrics>,
    debounce_samples: u32,
    poll_interval: Duration,
}

impl PollingDriver {
    pub fn new(
        store: Arc<SharedStateStore>,
        accountant: SessionAccountant,
        dispatcher: EventDispatcher,
        metrics: Arc<Metrics>,
        debounce_samples: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            slots: Vec::new(),
            gate: None,
            store,
            accountant,
            dispatcher,
            metrics,
            debounce_samples,
            poll_interval,
        }
    }

    /// Register a slot; slots are polled in the order they are added
    pub fn add_slot(&mut self, slot: SlotId, sensor: Box<dyn SensorSource>) {
        self.slots.push(SlotChannel {
            sensor,
            machine: OccupancyStateMachine::new(slot, self.debounce_samples),
        });
    }

    pub fn with_gate(mut self, gate: GateStation) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn gate_state(&self) -> Option<GateState> {
        self.gate.as_ref().map(GateStation::state)
    }

    /// Run one polling cycle.
    ///
    /// `now` drives gate timing and trigger debounce, `now_epoch` stamps slot
    /// transitions.
    pub fn poll_once(&mut self, now: Instant, now_epoch: u64) {
        let started = Instant::now();
        let mut changed = false;

        for channel in &mut self.slots {
            let slot = channel.machine.slot();
            let reading = match channel.sensor.sample() {
                Ok(reading) => reading,
                Err(e) => {
                    // Skip this slot for one cycle; its state is left as-is
                    self.metrics.record_sensor_error();
                    warn!(slot = %slot, error = %e, "sensor_sample_failed");
                    continue;
                }
            };

            let Some(transition) = channel.machine.observe(reading, now_epoch) else {
                continue;
            };
            self.store.apply_transition(slot, transition.state);
            changed = true;

            match transition.event {
                Some(SlotEvent::Arrived { slot, at }) => {
                    self.metrics.record_arrival();
                    info!(slot = %slot, at = %at, "slot_arrived");
                    self.dispatcher.notify(Notification::arrival(slot));
                }
                Some(SlotEvent::Departed { slot, entry_time, exit_time }) => {
                    let record = self.accountant.settle(slot, entry_time, exit_time);
                    self.metrics.record_departure(
                        exit_time.saturating_sub(entry_time),
                        record.charge,
                        record.flagged,
                    );
                    info!(
                        slot = %slot,
                        entry_time = %entry_time,
                        exit_time = %exit_time,
                        charge = %record.charge,
                        session_id = %record.session_id,
                        "slot_departed"
                    );
                    self.dispatcher.notify(Notification::departure(slot, record.charge));
                    self.dispatcher.record_history(record);
                }
                None => {}
            }
        }

        if changed {
            let snapshot = self.store.get_snapshot();
            let occupied = snapshot.values().filter(|s| s.occupancy == Occupancy::Occupied).count();
            let vacant = snapshot.values().filter(|s| s.occupancy == Occupancy::Vacant).count();
            self.metrics.set_slot_counts(occupied as u64, vacant as u64);
        }

        if let Some(gate) = self.gate.as_mut() {
            gate.poll(now, self.store.any_vacant(), &self.dispatcher, &self.metrics);
        }

        self.metrics.record_poll_cycle(started.elapsed().as_micros() as u64);
    }

    /// Poll until shutdown is signalled. Blocks the calling thread.
    pub fn run(mut self, shutdown: watch::Receiver<bool>) {
        info!(
            slots = %self.slots.len(),
            gate = %self.gate.is_some(),
            interval_ms = %self.poll_interval.as_millis(),
            debounce_samples = %self.debounce_samples,
            "poller_started"
        );

        while !*shutdown.borrow() {
            self.poll_once(Instant::now(), epoch_secs());
            thread::sleep(self.poll_interval);
        }

        info!("poller_stopped");
    }

    /// Run on a dedicated OS thread
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name("poller".to_string()).spawn(move || self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::SensorError;
    use crate::domain::types::{HistoryRecord, NotificationKind, OccupancyReading};
    use crate::services::gate::tests::RecordingActuator;
    use crate::services::gate::{GateMotion, GateTiming};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    /// Sensor fed from a shared script; `None` entries simulate failed reads
    #[derive(Clone, Default)]
    struct ScriptedSensor {
        script: Arc<Mutex<VecDeque<Option<bool>>>>,
    }

    impl ScriptedSensor {
        fn push(&self, readings: &[Option<bool>]) {
            self.script.lock().extend(readings.iter().copied());
        }
    }

    impl SensorSource for ScriptedSensor {
        fn sample(&mut self) -> Result<OccupancyReading, SensorError> {
            match self.script.lock().pop_front() {
                Some(Some(occupied)) => Ok(OccupancyReading { occupied }),
                Some(None) => Err(SensorError::EchoTimeout { phase: "start", timeout_ms: 100 }),
                None => Err(SensorError::Gpio(std::io::Error::other("script exhausted"))),
            }
        }
    }

    struct Harness {
        driver: PollingDriver,
        store: Arc<SharedStateStore>,
        metrics: Arc<Metrics>,
        history_rx: mpsc::Receiver<HistoryRecord>,
        notify_rx: mpsc::Receiver<Notification>,
    }

    fn harness(slots: &[(SlotId, ScriptedSensor)], debounce: u32) -> Harness {
        let ids: Vec<SlotId> = slots.iter().map(|(id, _)| *id).collect();
        let store = Arc::new(SharedStateStore::new(&ids));
        let metrics = Arc::new(Metrics::new());
        let (history_tx, history_rx) = mpsc::channel(16);
        let (notify_tx, notify_rx) = mpsc::channel(16);
        let dispatcher = EventDispatcher::new(history_tx, notify_tx, metrics.clone());
        let mut driver = PollingDriver::new(
            store.clone(),
            SessionAccountant::default(),
            dispatcher,
            metrics.clone(),
            debounce,
            Duration::from_millis(300),
        );
        for (id, sensor) in slots {
            driver.add_slot(*id, Box::new(sensor.clone()));
        }
        Harness { driver, store, metrics, history_rx, notify_rx }
    }

    fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_arrival_then_departure_settles_session() {
        let sensor = ScriptedSensor::default();
        sensor.push(&[Some(false), Some(true), Some(false)]);
        let mut h = harness(&[(SlotId(2), sensor)], 1);
        let t0 = Instant::now();

        h.driver.poll_once(t0, 900);
        h.driver.poll_once(t0, 1000);
        h.driver.poll_once(t0, 1050);

        let record = h.history_rx.try_recv().unwrap();
        assert_eq!(record.slot_id, SlotId(2));
        assert_eq!((record.entry_time, record.exit_time, record.charge), (1000, 1050, 50));

        let texts: Vec<_> = drain(&mut h.notify_rx).into_iter().map(|n| n.text).collect();
        assert_eq!(texts, vec!["Vehicle 2 has arrived", "Vehicle 2 has left, Charge: Rs. 50"]);

        let slot = h.store.slot(SlotId(2)).unwrap();
        assert_eq!(slot.occupancy, Occupancy::Vacant);
        assert_eq!(slot.last_transition_time, Some(1050));
    }

    #[test]
    fn test_sensor_failure_isolated_to_slot() {
        let failing = ScriptedSensor::default();
        failing.push(&[None, None]);
        let healthy = ScriptedSensor::default();
        healthy.push(&[Some(false), Some(true)]);
        let mut h = harness(&[(SlotId(1), failing), (SlotId(2), healthy)], 1);
        let t0 = Instant::now();

        h.driver.poll_once(t0, 10);
        h.driver.poll_once(t0, 20);

        assert_eq!(h.store.slot(SlotId(1)).unwrap().occupancy, Occupancy::Unknown);
        assert_eq!(h.store.slot(SlotId(2)).unwrap().occupancy, Occupancy::Occupied);
        assert_eq!(h.metrics.sensor_errors_total(), 2);
        assert_eq!(h.metrics.poll_cycles_total(), 2);
    }

    #[test]
    fn test_single_flicker_is_filtered() {
        let sensor = ScriptedSensor::default();
        sensor.push(&[Some(false), Some(false), Some(false), Some(true), Some(false), Some(false)]);
        let mut h = harness(&[(SlotId(1), sensor)], 3);
        let t0 = Instant::now();

        for t in 0..6 {
            h.driver.poll_once(t0, t);
        }

        assert!(drain(&mut h.notify_rx).is_empty());
        assert_eq!(h.store.slot(SlotId(1)).unwrap().occupancy, Occupancy::Vacant);
        assert_eq!(h.metrics.arrivals_total(), 0);
    }

    #[test]
    fn test_gate_refuses_when_full_and_opens_when_vacant() {
        let slot = ScriptedSensor::default();
        slot.push(&[Some(true), Some(true), Some(false)]);
        let trigger = ScriptedSensor::default();
        trigger.push(&[Some(true), Some(true), Some(true), Some(true), Some(true)]);

        let actuator = RecordingActuator::default();
        let t0 = Instant::now();
        let timing = GateTiming {
            open_pulse: Duration::from_millis(100),
            dwell: Duration::from_millis(100),
            close_pulse: Duration::from_millis(100),
        };
        let controller = GateController::new(timing, Box::new(actuator.clone()), t0);

        let mut h = harness(&[(SlotId(1), slot)], 1);
        h.driver = h.driver.with_gate(GateStation::new(Box::new(trigger), 1, controller));

        // Slot full: trigger refused once
        h.driver.poll_once(t0, 10);
        h.driver.poll_once(t0 + Duration::from_millis(10), 11);
        let notes = drain(&mut h.notify_rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::Info);
        assert_eq!(notes[0].text, "No spots available");
        assert!(actuator.motions.lock().is_empty());

        // Slot frees up: waiting vehicle admitted
        h.driver.poll_once(t0 + Duration::from_millis(20), 12);
        assert_eq!(h.driver.gate_state(), Some(GateState::Opening));
        assert_eq!(*actuator.motions.lock(), vec![GateMotion::Open]);
        assert_eq!(h.metrics.gate_state(), GATE_STATE_MOVING);

        h.driver.poll_once(t0 + Duration::from_millis(130), 13);
        assert_eq!(h.driver.gate_state(), Some(GateState::Open));
        assert_eq!(h.metrics.gate_state(), GATE_STATE_OPEN);
    }
}
