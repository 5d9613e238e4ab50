//! Lock-free metrics collection and periodic reporting
//!
//! Written from the polling thread and the async workers, read by the
//! periodic reporter and the Prometheus endpoint. Per-window values are
//! reset by atomic swap in `report()`.
//!
//! Relaxed ordering throughout: these are statistics, never inputs to the
//! occupancy or gate logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Session duration bucket boundaries (seconds)
/// Buckets: ≤60, ≤300, ≤900, ≤1800, ≤3600, ≤7200, ≤14400, ≤28800, ≤43200, ≤86400, >86400 s
const SESSION_SECS_BOUNDS: [u64; 10] =
    [60, 300, 900, 1800, 3600, 7200, 14400, 28800, 43200, 86400];

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn session_bucket_index(secs: u64) -> usize {
    SESSION_SECS_BOUNDS.partition_point(|&bound| bound < secs)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Gate state values for Prometheus gauge
pub const GATE_STATE_CLOSED: u64 = 0;
pub const GATE_STATE_MOVING: u64 = 1;
pub const GATE_STATE_OPEN: u64 = 2;

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method swaps the per-interval counters to get a consistent snapshot.
pub struct Metrics {
    /// Total poll cycles run (monotonic)
    poll_cycles_total: AtomicU64,
    /// Poll cycles since last report (reset on report)
    poll_cycles_since_report: AtomicU64,
    /// Max poll cycle duration in microseconds (reset on report)
    poll_max_us: AtomicU64,
    /// Poll cycle duration histogram buckets (cumulative)
    poll_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of poll cycle durations (cumulative)
    poll_sum_us: AtomicU64,
    /// Sensor reads that failed outright (monotonic)
    sensor_errors_total: AtomicU64,
    /// Ultrasonic echo timeouts, including ones covered by the last reading (monotonic)
    sensor_timeouts_total: AtomicU64,
    /// Committed arrivals (monotonic)
    arrivals_total: AtomicU64,
    /// Committed departures with a known entry time (monotonic)
    departures_total: AtomicU64,
    /// Sum of all settled charges (monotonic)
    revenue_total: AtomicU64,
    /// Sessions with exit before entry (monotonic)
    clock_skew_total: AtomicU64,
    /// Session duration histogram buckets (seconds, cumulative)
    session_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of session durations in seconds
    session_sum_secs: AtomicU64,
    /// Occupied slots right now
    slots_occupied: AtomicU64,
    /// Vacant slots right now
    slots_vacant: AtomicU64,
    /// Gate cycles started (monotonic)
    gate_cycles_total: AtomicU64,
    /// Triggers refused for lack of a free slot (monotonic)
    gate_no_spots_total: AtomicU64,
    /// Current gate state (0=closed, 1=moving, 2=open)
    gate_state: AtomicU64,
    /// History records persisted (monotonic)
    history_appended_total: AtomicU64,
    /// History append retries (monotonic)
    history_retries_total: AtomicU64,
    /// History records given up on after all retries (monotonic)
    history_failures_total: AtomicU64,
    /// Notifications delivered (monotonic)
    notifications_sent_total: AtomicU64,
    /// Notifications the sink rejected (monotonic)
    notifications_failed_total: AtomicU64,
    /// History records dropped due to channel full (monotonic)
    history_dropped: AtomicU64,
    /// Notifications dropped due to channel full (monotonic)
    notifications_dropped: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            poll_cycles_total: AtomicU64::new(0),
            poll_cycles_since_report: AtomicU64::new(0),
            poll_max_us: AtomicU64::new(0),
            poll_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            poll_sum_us: AtomicU64::new(0),
            sensor_errors_total: AtomicU64::new(0),
            sensor_timeouts_total: AtomicU64::new(0),
            arrivals_total: AtomicU64::new(0),
            departures_total: AtomicU64::new(0),
            revenue_total: AtomicU64::new(0),
            clock_skew_total: AtomicU64::new(0),
            session_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            session_sum_secs: AtomicU64::new(0),
            slots_occupied: AtomicU64::new(0),
            slots_vacant: AtomicU64::new(0),
            gate_cycles_total: AtomicU64::new(0),
            gate_no_spots_total: AtomicU64::new(0),
            gate_state: AtomicU64::new(GATE_STATE_CLOSED),
            history_appended_total: AtomicU64::new(0),
            history_retries_total: AtomicU64::new(0),
            history_failures_total: AtomicU64::new(0),
            notifications_sent_total: AtomicU64::new(0),
            notifications_failed_total: AtomicU64::new(0),
            history_dropped: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one completed poll cycle and its duration (lock-free)
    #[inline]
    pub fn record_poll_cycle(&self, duration_us: u64) {
        self.poll_cycles_total.fetch_add(1, Ordering::Relaxed);
        self.poll_cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.poll_sum_us.fetch_add(duration_us, Ordering::Relaxed);
        self.poll_buckets[bucket_index(duration_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.poll_max_us, duration_us);
    }

    #[inline]
    pub fn record_sensor_error(&self) {
        self.sensor_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sensor_timeout(&self) {
        self.sensor_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_arrival(&self) {
        self.arrivals_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settled session (lock-free)
    #[inline]
    pub fn record_departure(&self, duration_secs: u64, charge: u64, flagged: bool) {
        self.departures_total.fetch_add(1, Ordering::Relaxed);
        self.revenue_total.fetch_add(charge, Ordering::Relaxed);
        if flagged {
            self.clock_skew_total.fetch_add(1, Ordering::Relaxed);
        }
        self.session_buckets[session_bucket_index(duration_secs)].fetch_add(1, Ordering::Relaxed);
        self.session_sum_secs.fetch_add(duration_secs, Ordering::Relaxed);
    }

    /// Set occupied/vacant slot gauges
    #[inline]
    pub fn set_slot_counts(&self, occupied: u64, vacant: u64) {
        self.slots_occupied.store(occupied, Ordering::Relaxed);
        self.slots_vacant.store(vacant, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_cycle(&self) {
        self.gate_cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_no_spots(&self) {
        self.gate_no_spots_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Set gate state (0=closed, 1=moving, 2=open)
    #[inline]
    pub fn set_gate_state(&self, state: u64) {
        self.gate_state.store(state, Ordering::Relaxed);
    }

    #[inline]
    pub fn gate_state(&self) -> u64 {
        self.gate_state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_history_appended(&self) {
        self.history_appended_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_history_retry(&self) {
        self.history_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_history_failure(&self) {
        self.history_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification delivery attempt (lock-free)
    #[inline]
    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a history record dropped due to channel full (lock-free)
    #[inline]
    pub fn record_history_dropped(&self) {
        self.history_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification dropped due to channel full (lock-free)
    #[inline]
    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn poll_cycles_total(&self) -> u64 {
        self.poll_cycles_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sensor_errors_total(&self) -> u64 {
        self.sensor_errors_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sensor_timeouts_total(&self) -> u64 {
        self.sensor_timeouts_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn arrivals_total(&self) -> u64 {
        self.arrivals_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn departures_total(&self) -> u64 {
        self.departures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn history_appended_total(&self) -> u64 {
        self.history_appended_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn history_failures_total(&self) -> u64 {
        self.history_failures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn history_dropped(&self) -> u64 {
        self.history_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let cycles_since_report = self.poll_cycles_since_report.swap(0, Ordering::Relaxed);
        let poll_max_us = self.poll_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let polls_per_sec = if elapsed.as_secs_f64() > 0.0 {
            cycles_since_report as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let poll_buckets = load_buckets(&self.poll_buckets);
        let poll_count: u64 = poll_buckets.iter().sum();
        let poll_sum_us = self.poll_sum_us.load(Ordering::Relaxed);
        let poll_avg_us = if poll_count > 0 { poll_sum_us / poll_count } else { 0 };

        let session_buckets = load_buckets(&self.session_buckets);
        let session_count: u64 = session_buckets.iter().sum();
        let session_sum_secs = self.session_sum_secs.load(Ordering::Relaxed);
        let session_avg_secs = if session_count > 0 { session_sum_secs / session_count } else { 0 };

        MetricsSummary {
            poll_cycles_total: self.poll_cycles_total.load(Ordering::Relaxed),
            polls_per_sec,
            poll_buckets,
            poll_avg_us,
            poll_max_us,
            poll_p99_us: percentile_from_buckets(&poll_buckets, 0.99),
            sensor_errors_total: self.sensor_errors_total.load(Ordering::Relaxed),
            sensor_timeouts_total: self.sensor_timeouts_total.load(Ordering::Relaxed),
            arrivals_total: self.arrivals_total.load(Ordering::Relaxed),
            departures_total: self.departures_total.load(Ordering::Relaxed),
            revenue_total: self.revenue_total.load(Ordering::Relaxed),
            clock_skew_total: self.clock_skew_total.load(Ordering::Relaxed),
            session_buckets,
            session_avg_secs,
            slots_occupied: self.slots_occupied.load(Ordering::Relaxed),
            slots_vacant: self.slots_vacant.load(Ordering::Relaxed),
            gate_cycles_total: self.gate_cycles_total.load(Ordering::Relaxed),
            gate_no_spots_total: self.gate_no_spots_total.load(Ordering::Relaxed),
            gate_state: self.gate_state.load(Ordering::Relaxed),
            history_appended_total: self.history_appended_total.load(Ordering::Relaxed),
            history_retries_total: self.history_retries_total.load(Ordering::Relaxed),
            history_failures_total: self.history_failures_total.load(Ordering::Relaxed),
            notifications_sent_total: self.notifications_sent_total.load(Ordering::Relaxed),
            notifications_failed_total: self.notifications_failed_total.load(Ordering::Relaxed),
            history_dropped: self.history_dropped.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_SESSION_SECS_BOUNDS: [u64; 10] = SESSION_SECS_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub poll_cycles_total: u64,
    pub polls_per_sec: f64,
    /// Poll cycle duration histogram (µs, cumulative)
    pub poll_buckets: [u64; NUM_BUCKETS],
    pub poll_avg_us: u64,
    /// Max poll cycle duration since last report (µs)
    pub poll_max_us: u64,
    pub poll_p99_us: u64,
    pub sensor_errors_total: u64,
    pub sensor_timeouts_total: u64,
    pub arrivals_total: u64,
    pub departures_total: u64,
    pub revenue_total: u64,
    pub clock_skew_total: u64,
    /// Session duration histogram (seconds, cumulative)
    pub session_buckets: [u64; NUM_BUCKETS],
    pub session_avg_secs: u64,
    pub slots_occupied: u64,
    pub slots_vacant: u64,
    pub gate_cycles_total: u64,
    pub gate_no_spots_total: u64,
    /// Current gate state (0=closed, 1=moving, 2=open)
    pub gate_state: u64,
    pub history_appended_total: u64,
    pub history_retries_total: u64,
    pub history_failures_total: u64,
    pub notifications_sent_total: u64,
    pub notifications_failed_total: u64,
    pub history_dropped: u64,
    pub notifications_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            poll_cycles = %self.poll_cycles_total,
            polls_per_sec = format!("{:.1}", self.polls_per_sec),
            poll_max_us = %self.poll_max_us,
            poll_p99_us = %self.poll_p99_us,
            occupied = %self.slots_occupied,
            vacant = %self.slots_vacant,
            arrivals = %self.arrivals_total,
            departures = %self.departures_total,
            revenue = %self.revenue_total,
            gate_cycles = %self.gate_cycles_total,
            sensor_errors = %self.sensor_errors_total,
            history_failures = %self.history_failures_total,
            dropped = %(self.history_dropped + self.notifications_dropped),
            "metrics"
        );
    }
}
