//! Presence sensors
//!
//! Two sensor kinds share the `SensorSource` contract:
//! - `UltrasonicSensor` - HC-SR04 style trigger/echo ranging, occupied when the
//!   measured distance is below a threshold
//! - `BreakBeamSensor` - single digital input with configurable polarity
//!
//! Both sit on top of the `InputPin`/`OutputPin` traits so the hardware
//! backend (sysfs GPIO, test doubles) is swappable.

use crate::domain::error::SensorError;
use crate::domain::types::OccupancyReading;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Speed of sound used for echo ranging (cm/s)
const SPEED_OF_SOUND_CM_PER_S: f64 = 34300.0;

/// Width of the trigger pulse
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

pub trait InputPin: Send {
    fn is_high(&mut self) -> std::io::Result<bool>;
}

pub trait OutputPin: Send {
    fn set_level(&mut self, high: bool) -> std::io::Result<()>;
}

/// One physical presence sensor
pub trait SensorSource: Send {
    /// Take one reading. Must not touch shared state.
    fn sample(&mut self) -> Result<OccupancyReading, SensorError>;
}

pub struct UltrasonicSensor<T: OutputPin, E: InputPin> {
    trigger: T,
    echo: E,
    threshold_cm: f64,
    echo_timeout: Duration,
    /// Last reading backed by a complete echo
    last_good: Option<OccupancyReading>,
    metrics: Option<Arc<Metrics>>,
}

impl<T: OutputPin, E: InputPin> UltrasonicSensor<T, E> {
    pub fn new(trigger: T, echo: E, threshold_cm: f64, echo_timeout: Duration) -> Self {
        Self { trigger, echo, threshold_cm, echo_timeout, last_good: None, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fire one ping and convert the echo width to centimeters
    pub fn measure_distance_cm(&mut self) -> Result<f64, SensorError> {
        self.trigger.set_level(true)?;
        std::thread::sleep(TRIGGER_PULSE);
        self.trigger.set_level(false)?;

        let echo_start = self.wait_for_echo(true, "start")?;
        let echo_end = self.wait_for_echo(false, "end")?;

        let round_trip = echo_end.saturating_duration_since(echo_start);
        Ok(round_trip.as_secs_f64() * SPEED_OF_SOUND_CM_PER_S / 2.0)
    }

    /// Spin until the echo line reaches `level`, bounded by the echo timeout
    fn wait_for_echo(&mut self, level: bool, phase: &'static str) -> Result<Instant, SensorError> {
        let began = Instant::now();
        loop {
            if self.echo.is_high()? == level {
                return Ok(Instant::now());
            }
            if began.elapsed() >= self.echo_timeout {
                return Err(SensorError::EchoTimeout {
                    phase,
                    timeout_ms: self.echo_timeout.as_millis() as u64,
                });
            }
        }
    }
}

impl<T: OutputPin, E: InputPin> SensorSource for UltrasonicSensor<T, E> {
    fn sample(&mut self) -> Result<OccupancyReading, SensorError> {
        match self.measure_distance_cm() {
            Ok(distance_cm) => {
                let reading = OccupancyReading { occupied: distance_cm < self.threshold_cm };
                trace!(distance_cm = %format!("{:.1}", distance_cm), occupied = %reading.occupied, "ultrasonic_sample");
                self.last_good = Some(reading);
                Ok(reading)
            }
            Err(e @ SensorError::EchoTimeout { .. }) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_sensor_timeout();
                }
                // Hold the previous reading; with none yet the slot is skipped
                match self.last_good {
                    Some(reading) => {
                        warn!(error = %e, held = %reading.occupied, "ultrasonic_timeout_holding_last");
                        Ok(reading)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

pub struct BreakBeamSensor<P: InputPin> {
    pin: P,
    /// Beam broken reads as low (pull-up input)
    active_low: bool,
}

impl<P: InputPin> BreakBeamSensor<P> {
    pub fn new(pin: P, active_low: bool) -> Self {
        Self { pin, active_low }
    }
}

impl<P: InputPin> SensorSource for BreakBeamSensor<P> {
    fn sample(&mut self) -> Result<OccupancyReading, SensorError> {
        let high = self.pin.is_high()?;
        Ok(OccupancyReading { occupied: high != self.active_low })
    }
}
