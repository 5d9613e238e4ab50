//! Parking controller - slot occupancy, session charging, and entry gate
//!
//! Polls one distance or break-beam sensor per parking slot, debounces the
//! readings into committed occupancy, charges each completed session, and
//! runs the entry gate. State is pushed to display clients over MQTT.
//!
//! Module structure:
//! - `domain/` - Core types (Slot, HistoryRecord, Notification) and ports
//! - `io/` - External interfaces (GPIO, sensors, history files, MQTT, Prometheus)
//! - `services/` - Business logic (debounce, occupancy, accountant, gate, poller)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use parking_controller::domain::ports::{HistoryStore, NotificationSink};
use parking_controller::infra::config::GateConfig;
use parking_controller::infra::{Config, Metrics, SensorKind, SlotConfig};
use parking_controller::io::sensors::SensorSource;
use parking_controller::io::{
    BreakBeamSensor, JsonlHistoryStore, MemoryHistoryStore, MqttPublisher, PinActuator,
    StateBroadcaster, SysfsGpio, UltrasonicSensor,
};
use parking_controller::services::{
    create_history_worker, create_notify_worker, EventDispatcher, GateController, GateStation,
    GateTiming, PerSecondTariff, PollingDriver, RetryPolicy, SessionAccountant, SharedStateStore,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking controller - slot occupancy and entry gate
#[derive(Parser, Debug)]
#[command(name = "parking-controller", version, about)]
struct Args {
    /// Path to TOML configuration file [default: $CONFIG_FILE or config/dev.toml]
    #[arg(short, long)]
    config: Option<String>,
}

fn build_sensor(
    gpio: &SysfsGpio,
    slot: &SlotConfig,
    config: &Config,
    metrics: &Arc<Metrics>,
) -> anyhow::Result<Box<dyn SensorSource>> {
    let sensor: Box<dyn SensorSource> = match slot.kind {
        SensorKind::Ultrasonic => {
            // Presence of both pins is checked when the config is loaded
            let trigger_pin = slot.trigger_pin.context("ultrasonic slot without trigger_pin")?;
            let echo_pin = slot.echo_pin.context("ultrasonic slot without echo_pin")?;
            let trigger = gpio
                .output(trigger_pin)
                .with_context(|| format!("slot {}: trigger pin {trigger_pin}", slot.id))?;
            let echo = gpio
                .input(echo_pin)
                .with_context(|| format!("slot {}: echo pin {echo_pin}", slot.id))?;
            Box::new(
                UltrasonicSensor::new(trigger, echo, config.threshold_cm(), config.echo_timeout())
                    .with_metrics(metrics.clone()),
            )
        }
        SensorKind::BreakBeam => {
            let pin = slot.pin.context("break_beam slot without pin")?;
            let input = gpio.input(pin).with_context(|| format!("slot {}: beam pin {pin}", slot.id))?;
            Box::new(BreakBeamSensor::new(input, slot.active_low))
        }
    };
    Ok(sensor)
}

fn gate_timing(gate: &GateConfig) -> GateTiming {
    GateTiming {
        open_pulse: Duration::from_millis(gate.open_pulse_ms),
        dwell: Duration::from_millis(gate.dwell_ms),
        close_pulse: Duration::from_millis(gate.close_pulse_ms),
    }
}

fn build_gate_station(gpio: &SysfsGpio, config: &Config) -> anyhow::Result<GateStation> {
    let gate = config.gate();
    let trigger = gpio
        .input(gate.trigger_pin)
        .with_context(|| format!("gate trigger pin {}", gate.trigger_pin))?;
    let open = gpio.output(gate.open_pin).with_context(|| format!("gate open pin {}", gate.open_pin))?;
    let close = gpio
        .output(gate.close_pin)
        .with_context(|| format!("gate close pin {}", gate.close_pin))?;

    let controller =
        GateController::new(gate_timing(gate), Box::new(PinActuator::new(open, close)), Instant::now());
    Ok(GateStation::new(
        Box::new(BreakBeamSensor::new(trigger, gate.trigger_active_low)),
        config.debounce_samples(),
        controller,
    ))
}

async fn open_history_store(config: &Config) -> anyhow::Result<Arc<dyn HistoryStore>> {
    let file = config.history_file();
    if file.is_empty() {
        info!("history_store_memory");
        return Ok(Arc::new(MemoryHistoryStore::new()));
    }
    let store = JsonlHistoryStore::open(file)
        .await
        .with_context(|| format!("failed to open history file {file}"))?;
    info!(path = %store.path().display(), "history_store_opened");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-sample visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "parking-controller starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    // Start embedded MQTT broker with config
    parking_controller::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        slots = ?config.slot_ids(),
        debounce_samples = %config.debounce_samples(),
        poll_interval_ms = %config.poll_interval().as_millis(),
        rate_per_sec = %config.rate_per_sec(),
        gate_enabled = %config.gate_enabled(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(SharedStateStore::new(&config.slot_ids()));
    let history = open_history_store(&config).await?;
    let publisher = Arc::new(MqttPublisher::new(&config));

    // Workers: notifications first so the history worker can report degraded mode
    let sink: Arc<dyn NotificationSink> = publisher.clone();
    let (notify_tx, notify_worker) =
        create_notify_worker(sink, metrics.clone(), config.queue_capacity());
    let retry = RetryPolicy {
        attempts: config.history_retry_attempts(),
        base_delay: config.history_retry_base(),
    };
    let (history_tx, history_worker) = create_history_worker(
        history.clone(),
        notify_tx.clone(),
        retry,
        metrics.clone(),
        config.queue_capacity(),
    );
    let notify_handle = tokio::spawn(notify_worker.run());
    let history_handle = tokio::spawn(history_worker.run());
    let dispatcher = EventDispatcher::new(history_tx, notify_tx, metrics.clone());

    // Sensors
    let gpio = SysfsGpio::new();
    let accountant = SessionAccountant::new(Box::new(PerSecondTariff {
        rate_per_sec: config.rate_per_sec(),
    }));
    let mut poller = PollingDriver::new(
        store.clone(),
        accountant,
        dispatcher,
        metrics.clone(),
        config.debounce_samples(),
        config.poll_interval(),
    );
    for slot in config.slots() {
        let sensor = build_sensor(&gpio, slot, &config, &metrics)?;
        poller.add_slot(slot.slot_id(), sensor);
        info!(slot = %slot.id, kind = ?slot.kind, "slot_sensor_ready");
    }
    if config.gate_enabled() {
        poller = poller.with_gate(build_gate_station(&gpio, &config)?);
        info!(trigger_pin = %config.gate().trigger_pin, "gate_ready");
    }

    // Let trigger lines and echo receivers settle before the first sample
    tokio::time::sleep(config.settle()).await;
    let poller_handle = poller.spawn(shutdown_rx.clone()).context("failed to spawn poller thread")?;

    // Periodic state and history broadcast
    let broadcaster = StateBroadcaster::new(
        publisher.clone(),
        store.clone(),
        history.clone(),
        config.state_interval(),
        config.history_interval(),
        config.history_limit(),
    );
    tokio::spawn(broadcaster.run(shutdown_rx.clone()));

    // Inbound delete commands
    let delete_config = config.clone();
    let delete_history = history.clone();
    let delete_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = parking_controller::io::mqtt::start_delete_listener(
            &delete_config,
            delete_history,
            delete_shutdown,
        )
        .await
        {
            error!(error = %e, "delete_listener_error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_store = store.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = parking_controller::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_store,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // The poller owns the dispatcher; once it stops the worker channels close
    // and both workers drain what is left
    match tokio::task::spawn_blocking(move || poller_handle.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("poller_thread_panicked"),
        Err(e) => error!(error = %e, "poller_join_failed"),
    }
    if let Err(e) = history_handle.await {
        error!(error = %e, "history_worker_join_failed");
    }
    if let Err(e) = notify_handle.await {
        error!(error = %e, "notify_worker_join_failed");
    }

    info!("parking-controller shutdown complete");
    Ok(())
}
