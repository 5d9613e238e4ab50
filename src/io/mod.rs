//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `gpio` - Linux sysfs GPIO pins
//! - `sensors` - Ultrasonic and break-beam occupancy sensors
//! - `actuator` - Two-relay gate motor driver
//! - `history` - In-memory and JSONL history stores
//! - `mqtt` - Client options and the delete command listener
//! - `mqtt_egress` - MQTT publisher for state, history, and events
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod actuator;
pub mod gpio;
pub mod history;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod sensors;

// Re-export commonly used types
pub use actuator::PinActuator;
pub use gpio::SysfsGpio;
pub use history::{JsonlHistoryStore, MemoryHistoryStore};
pub use mqtt::{start_delete_listener, DeleteRequest};
pub use mqtt_egress::{MqttPublisher, StateBroadcaster};
pub use sensors::{BreakBeamSensor, SensorSource, UltrasonicSensor};
