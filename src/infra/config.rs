//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::SlotId;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Ultrasonic,
    BreakBeam,
}

/// Wiring of one parking slot sensor (BCM pin numbers)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlotConfig {
    pub id: u8,
    pub kind: SensorKind,
    /// Ultrasonic trigger output
    #[serde(default)]
    pub trigger_pin: Option<u32>,
    /// Ultrasonic echo input
    #[serde(default)]
    pub echo_pin: Option<u32>,
    /// Break-beam input
    #[serde(default)]
    pub pin: Option<u32>,
    /// Break-beam reads low when the beam is broken
    #[serde(default = "default_active_low")]
    pub active_low: bool,
}

fn default_active_low() -> bool {
    true
}

impl SlotConfig {
    fn ultrasonic(id: u8, trigger_pin: u32, echo_pin: u32) -> Self {
        Self {
            id,
            kind: SensorKind::Ultrasonic,
            trigger_pin: Some(trigger_pin),
            echo_pin: Some(echo_pin),
            pin: None,
            active_low: default_active_low(),
        }
    }

    pub fn slot_id(&self) -> SlotId {
        SlotId(self.id)
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self.kind {
            SensorKind::Ultrasonic if self.trigger_pin.is_none() || self.echo_pin.is_none() => {
                bail!("slot {} is ultrasonic but lacks trigger_pin/echo_pin", self.id)
            }
            SensorKind::BreakBeam if self.pin.is_none() => {
                bail!("slot {} is break_beam but lacks pin", self.id)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensingConfig {
    /// Ultrasonic distance below which a slot reads occupied
    #[serde(default = "default_threshold_cm")]
    pub threshold_cm: f64,
    /// Bound on each echo edge wait
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
    /// Consecutive identical readings required to commit a change
    #[serde(default = "default_debounce_samples")]
    pub debounce_samples: u32,
    /// Pause between polling cycles
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Trigger line settle time after GPIO export
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_threshold_cm() -> f64 {
    8.0
}

fn default_echo_timeout_ms() -> u64 {
    100
}

fn default_debounce_samples() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_settle_ms() -> u64 {
    500
}

impl Default for SensingConfig {
    fn default() -> Self {
        Self {
            threshold_cm: default_threshold_cm(),
            echo_timeout_ms: default_echo_timeout_ms(),
            debounce_samples: default_debounce_samples(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TariffConfig {
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: u64,
}

fn default_rate_per_sec() -> u64 {
    1
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self { rate_per_sec: default_rate_per_sec() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_gate_trigger_pin")]
    pub trigger_pin: u32,
    /// Trigger sensor reads low when a vehicle is present
    #[serde(default = "default_active_low")]
    pub trigger_active_low: bool,
    #[serde(default = "default_gate_open_pin")]
    pub open_pin: u32,
    #[serde(default = "default_gate_close_pin")]
    pub close_pin: u32,
    #[serde(default = "default_open_pulse_ms")]
    pub open_pulse_ms: u64,
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
    #[serde(default = "default_close_pulse_ms")]
    pub close_pulse_ms: u64,
}

fn default_gate_trigger_pin() -> u32 {
    20
}

fn default_gate_open_pin() -> u32 {
    21
}

fn default_gate_close_pin() -> u32 {
    26
}

fn default_open_pulse_ms() -> u64 {
    1000
}

fn default_dwell_ms() -> u64 {
    5000
}

fn default_close_pulse_ms() -> u64 {
    1000
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_pin: default_gate_trigger_pin(),
            trigger_active_low: default_active_low(),
            open_pin: default_gate_open_pin(),
            close_pin: default_gate_close_pin(),
            open_pulse_ms: default_open_pulse_ms(),
            dwell_ms: default_dwell_ms(),
            close_pulse_ms: default_close_pulse_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// JSONL history log; empty keeps history in memory only
    #[serde(default = "default_history_file")]
    pub file: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_history_file() -> String {
    "history.jsonl".to_string()
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    200
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: default_history_file(),
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: default_mqtt_host(), port: default_broker_port(), username: None, password: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_state_interval_ms")]
    pub state_interval_ms: u64,
    #[serde(default = "default_history_interval_ms")]
    pub history_interval_ms: u64,
    /// Most recent records per history message; keeps it under the packet limit
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Slot snapshot topic (QoS 0, retained)
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    /// Full history listing topic (QoS 0, retained)
    #[serde(default = "default_history_topic")]
    pub history_topic: String,
    /// Notification topic (QoS 1)
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    /// Inbound delete requests
    #[serde(default = "default_delete_topic")]
    pub delete_topic: String,
}

fn default_state_interval_ms() -> u64 {
    1000
}

fn default_history_interval_ms() -> u64 {
    2000
}

fn default_history_limit() -> usize {
    1000
}

fn default_state_topic() -> String {
    "parking/state".to_string()
}

fn default_history_topic() -> String {
    "parking/history".to_string()
}

fn default_events_topic() -> String {
    "parking/events".to_string()
}

fn default_delete_topic() -> String {
    "parking/delete".to_string()
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            state_interval_ms: default_state_interval_ms(),
            history_interval_ms: default_history_interval_ms(),
            history_limit: default_history_limit(),
            state_topic: default_state_topic(),
            history_topic: default_history_topic(),
            events_topic: default_events_topic(),
            delete_topic: default_delete_topic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    30
}

fn default_prometheus_port() -> u16 {
    9100
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueuesConfig {
    /// Capacity of the history and notification queues
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self { capacity: default_queue_capacity() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Unique site identifier (used as Prometheus label)
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "parking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default = "default_slots")]
    pub slots: Vec<SlotConfig>,
    #[serde(default)]
    pub sensing: SensingConfig,
    #[serde(default)]
    pub tariff: TariffConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
}

/// Four ultrasonic bays on the reference board
fn default_slots() -> Vec<SlotConfig> {
    vec![
        SlotConfig::ultrasonic(1, 14, 15),
        SlotConfig::ultrasonic(2, 10, 9),
        SlotConfig::ultrasonic(3, 23, 24),
        SlotConfig::ultrasonic(4, 17, 18),
    ]
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    slots: Vec<SlotConfig>,
    sensing: SensingConfig,
    rate_per_sec: u64,
    gate: GateConfig,
    history_file: String,
    history_retry_attempts: u32,
    history_retry_base_ms: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broadcast: BroadcastConfig,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    queue_capacity: usize,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            slots: default_slots(),
            sensing: SensingConfig::default(),
            rate_per_sec: default_rate_per_sec(),
            gate: GateConfig::default(),
            history_file: default_history_file(),
            history_retry_attempts: default_retry_attempts(),
            history_retry_base_ms: default_retry_base_ms(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_broker_port(),
            mqtt_username: None,
            mqtt_password: None,
            broadcast: BroadcastConfig::default(),
            broker_enabled: default_broker_enabled(),
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_broker_port(),
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
            queue_capacity: default_queue_capacity(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> anyhow::Result<Self> {
        if toml_config.slots.is_empty() {
            bail!("at least one [[slots]] entry is required");
        }
        let mut seen = HashSet::new();
        for slot in &toml_config.slots {
            slot.validate()?;
            if !seen.insert(slot.id) {
                bail!("duplicate slot id {}", slot.id);
            }
        }
        if toml_config.sensing.debounce_samples == 0 {
            bail!("sensing.debounce_samples must be at least 1");
        }
        if toml_config.queues.capacity == 0 {
            bail!("queues.capacity must be at least 1");
        }
        if toml_config.broadcast.state_interval_ms == 0 {
            bail!("broadcast.state_interval_ms must be at least 1");
        }
        if toml_config.broadcast.history_interval_ms == 0 {
            bail!("broadcast.history_interval_ms must be at least 1");
        }
        if toml_config.broadcast.history_limit == 0 {
            bail!("broadcast.history_limit must be at least 1");
        }
        if toml_config.metrics.interval_secs == 0 {
            bail!("metrics.interval_secs must be at least 1");
        }

        Ok(Self {
            site_id: toml_config.site.id,
            slots: toml_config.slots,
            sensing: toml_config.sensing,
            rate_per_sec: toml_config.tariff.rate_per_sec,
            gate: toml_config.gate,
            history_file: toml_config.history.file,
            history_retry_attempts: toml_config.history.retry_attempts,
            history_retry_base_ms: toml_config.history.retry_base_ms,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broadcast: toml_config.broadcast,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            queue_capacity: toml_config.queues.capacity,
            config_file,
        })
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        self.slots.iter().map(SlotConfig::slot_id).collect()
    }

    // Getters for all config fields

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn slots(&self) -> &[SlotConfig] {
        &self.slots
    }

    pub fn threshold_cm(&self) -> f64 {
        self.sensing.threshold_cm
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.sensing.echo_timeout_ms)
    }

    pub fn debounce_samples(&self) -> u32 {
        self.sensing.debounce_samples
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sensing.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.sensing.settle_ms)
    }

    pub fn rate_per_sec(&self) -> u64 {
        self.rate_per_sec
    }

    pub fn gate(&self) -> &GateConfig {
        &self.gate
    }

    pub fn gate_enabled(&self) -> bool {
        self.gate.enabled
    }

    pub fn history_file(&self) -> &str {
        &self.history_file
    }

    pub fn history_retry_attempts(&self) -> u32 {
        self.history_retry_attempts
    }

    pub fn history_retry_base(&self) -> Duration {
        Duration::from_millis(self.history_retry_base_ms)
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn state_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast.state_interval_ms)
    }

    pub fn history_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast.history_interval_ms)
    }

    pub fn history_limit(&self) -> usize {
        self.broadcast.history_limit
    }

    pub fn state_topic(&self) -> &str {
        &self.broadcast.state_topic
    }

    pub fn history_topic(&self) -> &str {
        &self.broadcast.history_topic
    }

    pub fn events_topic(&self) -> &str {
        &self.broadcast.events_topic
    }

    pub fn delete_topic(&self) -> &str {
        &self.broadcast.delete_topic
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> anyhow::Result<Config> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        Config::from_toml(toml_config, "inline".to_string())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.slot_ids(), vec![SlotId(1), SlotId(2), SlotId(3), SlotId(4)]);
        assert_eq!(config.threshold_cm(), 8.0);
        assert_eq!(config.echo_timeout(), Duration::from_millis(100));
        assert_eq!(config.debounce_samples(), 3);
        assert_eq!(config.rate_per_sec(), 1);
        assert!(!config.gate_enabled());
        assert_eq!(config.state_topic(), "parking/state");
        assert_eq!(config.state_interval(), Duration::from_secs(1));
        assert_eq!(config.history_interval(), Duration::from_secs(2));
        assert_eq!(config.history_limit(), 1000);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.slots().len(), 4);
        assert_eq!(config.slots()[0].trigger_pin, Some(14));
        assert_eq!(config.slots()[0].echo_pin, Some(15));
    }

    #[test]
    fn test_break_beam_slot() {
        let config = parse(
            r#"
[[slots]]
id = 7
kind = "break_beam"
pin = 5
active_low = false
"#,
        )
        .unwrap();
        assert_eq!(config.slot_ids(), vec![SlotId(7)]);
        assert_eq!(config.slots()[0].kind, SensorKind::BreakBeam);
        assert!(!config.slots()[0].active_low);
    }

    #[test]
    fn test_missing_pins_rejected() {
        let err = parse(
            r#"
[[slots]]
id = 1
kind = "ultrasonic"
trigger_pin = 14
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("echo_pin"));
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let err = parse(
            r#"
[[slots]]
id = 1
kind = "break_beam"
pin = 5

[[slots]]
id = 1
kind = "break_beam"
pin = 6
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate slot id 1"));
    }

    #[test]
    fn test_zero_debounce_rejected() {
        assert!(parse("[sensing]\ndebounce_samples = 0\n").is_err());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let err = parse("[queues]\ncapacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("queues.capacity"));
    }

    #[test]
    fn test_zero_broadcast_intervals_rejected() {
        let err = parse("[broadcast]\nstate_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("state_interval_ms"));
        let err = parse("[broadcast]\nhistory_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("history_interval_ms"));
        let err = parse("[broadcast]\nhistory_limit = 0\n").unwrap_err();
        assert!(err.to_string().contains("history_limit"));
    }

    #[test]
    fn test_zero_metrics_interval_rejected() {
        let err = parse("[metrics]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("metrics.interval_secs"));
    }

    #[test]
    fn test_resolve_config_path() {
        let args = vec!["bin".to_string(), "--config".to_string(), "a.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "a.toml");

        let args = vec!["bin".to_string(), "--config=b.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "b.toml");
    }
}
