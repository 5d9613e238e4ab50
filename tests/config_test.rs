//! Integration tests for configuration loading

use parking_controller::domain::types::SlotId;
use parking_controller::infra::{Config, SensorKind};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-lot"

[[slots]]
id = 1
kind = "ultrasonic"
trigger_pin = 5
echo_pin = 6

[[slots]]
id = 7
kind = "break_beam"
pin = 12
active_low = false

[sensing]
threshold_cm = 12.5
debounce_samples = 5
poll_interval_ms = 250

[tariff]
rate_per_sec = 2

[gate]
enabled = true
dwell_ms = 3000

[history]
file = ""
retry_attempts = 2

[mqtt]
host = "test-host"
port = 1884

[broadcast]
state_topic = "lot/state"

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-lot");
    assert_eq!(config.slot_ids(), vec![SlotId(1), SlotId(7)]);
    assert_eq!(config.slots()[1].kind, SensorKind::BreakBeam);
    assert!(!config.slots()[1].active_low);
    assert_eq!(config.threshold_cm(), 12.5);
    assert_eq!(config.debounce_samples(), 5);
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.rate_per_sec(), 2);
    assert!(config.gate_enabled());
    assert_eq!(config.gate().dwell_ms, 3000);
    assert_eq!(config.gate().open_pulse_ms, 1000);
    assert_eq!(config.history_file(), "");
    assert_eq!(config.history_retry_attempts(), 2);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.state_topic(), "lot/state");
    assert_eq!(config.events_topic(), "parking/events");
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_invalid_slot_wiring_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[[slots]]\nid = 1\nkind = \"ultrasonic\"\ntrigger_pin = 5\n")
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("echo_pin"));
}

#[test]
fn test_zero_capacity_and_interval_are_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[queues]\ncapacity = 0\n\n[broadcast]\nstate_interval_ms = 0\n")
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("queues.capacity"));

    // The controller falls back to defaults rather than starting with a zero-sized queue
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert!(config.queue_capacity() > 0);
    assert!(config.state_interval() > Duration::ZERO);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.slots().len(), 4);
    assert!(!config.gate_enabled());
}

#[test]
fn test_shipped_dev_config_parses() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.site_id(), "parking-dev");
    assert_eq!(config.slot_ids(), vec![SlotId(1), SlotId(2), SlotId(3), SlotId(4)]);
}
