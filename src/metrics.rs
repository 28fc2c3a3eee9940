//! Metrics instrumentation for catalog-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The parent daemon is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `catalog_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `store`: store id
//! - `venue`: venue key
//! - `dependency`: sot, marketplace
//! - `phase`: items, inventory
//! - `status`: success, error, rejected

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Record the outcome of one engine run
pub fn record_run(store_id: u32, outcome: &str) {
    counter!(
        "catalog_sync_runs_total",
        "store" => store_id.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record run duration
pub fn record_run_duration(store_id: u32, duration: Duration) {
    histogram!(
        "catalog_sync_run_seconds",
        "store" => store_id.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record updates pushed in one phase
pub fn record_pushed(store_id: u32, phase: &str, count: usize) {
    counter!(
        "catalog_sync_pushed_total",
        "store" => store_id.to_string(),
        "phase" => phase.to_string()
    )
    .increment(count as u64);
}

/// Record a 429 from the marketplace
pub fn record_rate_limit_hit(venue: &str) {
    counter!(
        "catalog_sync_rate_limit_hits_total",
        "venue" => venue.to_string()
    )
    .increment(1);
}

/// Set the current adaptive batch size for a venue
pub fn set_batch_size(venue: &str, size: usize) {
    gauge!(
        "catalog_sync_batch_size",
        "venue" => venue.to_string()
    )
    .set(size as f64);
}

/// Record a circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, status: &str) {
    counter!(
        "catalog_sync_circuit_calls_total",
        "circuit" => circuit.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set circuit breaker state (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "catalog_sync_circuit_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record a state-file save outcome
pub fn record_state_save(store_id: u32, status: &str) {
    counter!(
        "catalog_sync_state_saves_total",
        "store" => store_id.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record sweep duration and outcome
pub fn record_sweep(outcome: &str, duration: Duration) {
    counter!(
        "catalog_sync_sweeps_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("catalog_sync_sweep_seconds").record(duration.as_secs_f64());
}

/// Set consecutive failures for a store (drives degraded/unhealthy verdicts)
pub fn set_consecutive_failures(store_id: u32, count: u32) {
    gauge!(
        "catalog_sync_consecutive_failures",
        "store" => store_id.to_string()
    )
    .set(count as f64);
}

/// Record background worker drain progress
pub fn set_worker_remaining(store_id: u32, remaining: usize) {
    gauge!(
        "catalog_sync_worker_remaining",
        "store" => store_id.to_string()
    )
    .set(remaining as f64);
}
