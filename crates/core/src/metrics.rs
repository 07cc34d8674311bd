//! Metrics definitions for the explorer core.
//!
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "connection_attempts_total",
        "Total number of connection attempts, labelled by outcome"
    );
    describe_counter!(
        "heads_received_total",
        "Total number of head notifications received"
    );
    describe_counter!(
        "blocks_accepted_total",
        "Total number of blocks inserted into the block window"
    );
    describe_counter!(
        "blocks_rejected_total",
        "Total number of blocks rejected by the window guard"
    );
    describe_counter!(
        "block_fetch_errors_total",
        "Total number of block body fetches that failed"
    );
    describe_histogram!(
        "block_fetch_duration_seconds",
        "Time taken to fetch and summarize a block body in seconds"
    );
    describe_counter!(
        "extrinsics_accepted_total",
        "Total number of extrinsics inserted into the extrinsic window"
    );
    describe_counter!(
        "metrics_polls_total",
        "Total number of metrics poll ticks, labelled by outcome"
    );
}

/// Record a connection attempt.
///
/// # Arguments
/// * `outcome` - "connected" or the failure kind
pub fn record_connection_attempt(outcome: &str) {
    counter!("connection_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a received head notification.
pub fn record_head_received() {
    counter!("heads_received_total").increment(1);
}

/// Record a block accepted into the window.
pub fn record_block_accepted() {
    counter!("blocks_accepted_total").increment(1);
}

/// Record a block rejected by the window guard.
///
/// # Arguments
/// * `reason` - "duplicate" or "stale"
pub fn record_block_rejected(reason: &'static str) {
    counter!("blocks_rejected_total", "reason" => reason).increment(1);
}

/// Record a failed block body fetch.
pub fn record_block_fetch_error(kind: &'static str) {
    counter!("block_fetch_errors_total", "kind" => kind).increment(1);
}

/// Record extrinsics accepted into the window.
pub fn record_extrinsics_accepted(count: u64) {
    counter!("extrinsics_accepted_total").increment(count);
}

/// Record the outcome of a metrics tick ("success", "failed" or "skipped").
pub fn record_poll(outcome: &'static str) {
    counter!("metrics_polls_total", "outcome" => outcome).increment(1);
}

/// A timer that records the block fetch duration when dropped.
pub struct FetchTimer {
    start: Instant,
}

impl FetchTimer {
    /// Start a new fetch timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for FetchTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FetchTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        histogram!("block_fetch_duration_seconds").record(duration);
    }
}
