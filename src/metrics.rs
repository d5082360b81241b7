//! Lightweight metrics helpers for Postern.
//!
//! This module exposes a small set of convenience functions and RAII timers
//! wrapping the `metrics` crate macros. It intentionally avoids embedding a
//! concrete exporter (the operator can install any compatible recorder) while
//! still documenting and describing Postern-specific metric names.
//!
//! Provided metrics (labels vary by family):
//! * `postern_requests_total` (counter)
//! * `postern_request_duration_seconds` (histogram)
//! * `postern_upstream_requests_total` (counter)
//! * `postern_target_health_status` (gauge per target)
//! * `postern_registered_targets` (gauge)
//! * `postern_worker_respawns_total` (counter)
use std::{collections::HashMap, sync::Mutex, time::Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const POSTERN_REQUESTS_TOTAL: &str = "postern_requests_total";
pub const POSTERN_REQUEST_DURATION_SECONDS: &str = "postern_request_duration_seconds";
pub const POSTERN_UPSTREAM_REQUESTS_TOTAL: &str = "postern_upstream_requests_total";
pub const POSTERN_TARGET_HEALTH_STATUS: &str = "postern_target_health_status";
pub const POSTERN_REGISTERED_TARGETS: &str = "postern_registered_targets";
pub const POSTERN_WORKER_RESPAWNS_TOTAL: &str = "postern_worker_respawns_total";

/// Storage for per-target health gauges
pub static TARGET_HEALTH_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_gauge!(
        POSTERN_TARGET_HEALTH_STATUS,
        "Health status of individual targets (1 for healthy, 0 for failing)"
    );
    describe_counter!(
        POSTERN_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests handled by the gateway."
    );
    describe_histogram!(
        POSTERN_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests handled by the gateway."
    );
    describe_counter!(
        POSTERN_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests forwarded to upstream targets."
    );
    describe_gauge!(
        POSTERN_REGISTERED_TARGETS,
        "Number of target instances currently registered."
    );
    describe_counter!(
        POSTERN_WORKER_RESPAWNS_TOTAL,
        Unit::Count,
        "Number of worker routers respawned by the supervisor."
    );

    Mutex::new(HashMap::new())
});

/// Set (and record) the health status gauge for a target instance.
pub fn set_target_health(target: &str, is_healthy: bool) {
    let health_value = if is_healthy { 1.0 } else { 0.0 };

    if let Ok(mut gauges) = TARGET_HEALTH_GAUGES.lock() {
        gauges.insert(target.to_string(), health_value);
    } else {
        tracing::error!("failed to acquire lock for target health gauges");
        return;
    }

    gauge!(POSTERN_TARGET_HEALTH_STATUS, "target" => target.to_string()).set(health_value);
}

/// Increment the total request counter for an inbound gateway request.
pub fn increment_request_total(path: &str, method: &str, status: u16) {
    counter!(
        POSTERN_REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(path: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        POSTERN_REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Increment total count of proxied upstream requests.
pub fn increment_upstream_request(target: &str, status: u16) {
    counter!(
        POSTERN_UPSTREAM_REQUESTS_TOTAL,
        "target" => target.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set the number of currently registered target instances.
pub fn set_registered_targets(count: usize) {
    gauge!(POSTERN_REGISTERED_TARGETS).set(count as f64);
}

/// Count one worker respawn.
pub fn increment_worker_respawn() {
    counter!(POSTERN_WORKER_RESPAWNS_TOTAL).increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    path: String,
    method: String,
}

impl RequestTimer {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.path, &self.method, self.start.elapsed());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&TARGET_HEALTH_GAUGES);
    tracing::debug!("metrics descriptions registered");
    Ok(())
}
