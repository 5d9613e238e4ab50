//! Prometheus metrics HTTP endpoint
//!
//! Exposes controller metrics in Prometheus text format at /metrics and a
//! liveness check at /health. Uses hyper for the HTTP server.

use crate::domain::types::Occupancy;
use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS, METRICS_SESSION_SECS_BOUNDS,
};
use crate::services::state_store::{SharedStateStore, Snapshot};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, snapshot: &Snapshot, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_poll_metrics(&mut output, site_id, &summary);
    write_session_metrics(&mut output, site_id, &summary);
    write_slot_metrics(&mut output, site_id, &summary, snapshot);
    write_gate_metrics(&mut output, site_id, &summary);
    write_worker_metrics(&mut output, site_id, &summary);

    output
}

fn write_poll_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_poll_cycles_total",
        "Total polling cycles run",
        MetricType::Counter,
        site,
        summary.poll_cycles_total,
    );
    write_histogram(
        output,
        "parking_poll_cycle_us",
        "Polling cycle duration in microseconds",
        site,
        &summary.poll_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.poll_avg_us,
    );
    write_metric(
        output,
        "parking_poll_cycle_p99_us",
        "99th percentile polling cycle duration",
        MetricType::Gauge,
        site,
        summary.poll_p99_us,
    );
    write_metric(
        output,
        "parking_sensor_errors_total",
        "Sensor samples skipped after a failed read",
        MetricType::Counter,
        site,
        summary.sensor_errors_total,
    );
    write_metric(
        output,
        "parking_sensor_timeouts_total",
        "Ultrasonic echo timeouts",
        MetricType::Counter,
        site,
        summary.sensor_timeouts_total,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_arrivals_total",
        "Committed arrivals",
        MetricType::Counter,
        site,
        summary.arrivals_total,
    );
    write_metric(
        output,
        "parking_departures_total",
        "Settled departures",
        MetricType::Counter,
        site,
        summary.departures_total,
    );
    write_metric(
        output,
        "parking_charge_total",
        "Sum of all settled charges",
        MetricType::Counter,
        site,
        summary.revenue_total,
    );
    write_metric(
        output,
        "parking_flagged_sessions_total",
        "Sessions clamped to zero charge after clock skew",
        MetricType::Counter,
        site,
        summary.clock_skew_total,
    );
    write_histogram(
        output,
        "parking_session_secs",
        "Parking session duration in seconds",
        site,
        &summary.session_buckets,
        &METRICS_SESSION_SECS_BOUNDS,
        summary.session_avg_secs,
    );
}

fn write_slot_metrics(output: &mut String, site: &str, summary: &MetricsSummary, snapshot: &Snapshot) {
    write_metric(
        output,
        "parking_slots_occupied",
        "Slots currently occupied",
        MetricType::Gauge,
        site,
        summary.slots_occupied,
    );
    write_metric(
        output,
        "parking_slots_vacant",
        "Slots currently vacant",
        MetricType::Gauge,
        site,
        summary.slots_vacant,
    );

    let _ = writeln!(
        output,
        "# HELP parking_slot_occupied Per-slot occupancy (1=occupied, 0=vacant, -1=unknown)"
    );
    let _ = writeln!(output, "# TYPE parking_slot_occupied gauge");
    for (slot_id, slot) in snapshot {
        let value: i8 = match slot.occupancy {
            Occupancy::Occupied => 1,
            Occupancy::Vacant => 0,
            Occupancy::Unknown => -1,
        };
        let _ = writeln!(output, "parking_slot_occupied{{site=\"{site}\",slot=\"{slot_id}\"}} {value}");
    }
}

fn write_gate_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_gate_state",
        "Current gate state (0=closed, 1=moving, 2=open)",
        MetricType::Gauge,
        site,
        summary.gate_state,
    );
    write_metric(
        output,
        "parking_gate_cycles_total",
        "Gate open/close cycles started",
        MetricType::Counter,
        site,
        summary.gate_cycles_total,
    );
    write_metric(
        output,
        "parking_gate_no_spots_total",
        "Gate triggers refused because every slot was taken",
        MetricType::Counter,
        site,
        summary.gate_no_spots_total,
    );
}

fn write_worker_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_history_appended_total",
        "History records persisted",
        MetricType::Counter,
        site,
        summary.history_appended_total,
    );
    write_metric(
        output,
        "parking_history_retries_total",
        "History append retries",
        MetricType::Counter,
        site,
        summary.history_retries_total,
    );
    write_metric(
        output,
        "parking_history_failures_total",
        "History records abandoned after exhausting retries",
        MetricType::Counter,
        site,
        summary.history_failures_total,
    );
    write_metric(
        output,
        "parking_notifications_sent_total",
        "Notifications delivered",
        MetricType::Counter,
        site,
        summary.notifications_sent_total,
    );
    write_metric(
        output,
        "parking_notifications_failed_total",
        "Notifications the transport rejected",
        MetricType::Counter,
        site,
        summary.notifications_failed_total,
    );
    write_metric(
        output,
        "parking_history_dropped_total",
        "History records dropped due to full queue",
        MetricType::Counter,
        site,
        summary.history_dropped,
    );
    write_metric(
        output,
        "parking_notifications_dropped_total",
        "Notifications dropped due to full queue",
        MetricType::Counter,
        site,
        summary.notifications_dropped,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    store: Arc<SharedStateStore>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &store.get_snapshot(), &site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
        }
        (&Method::GET, "/health") => {
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("ok")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    };

    // Builder only fails on invalid header values; fall back to a bare 500
    Ok(response.unwrap_or_else(|_| {
        let mut fallback = Response::new(Full::new(Bytes::new()));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    }))
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    store: Arc<SharedStateStore>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let store = store.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let store = store.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, store, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
