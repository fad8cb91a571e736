//! Per-subsystem Prometheus registries (§9.5), one `Lazy` block per
//! subsystem, registered next to the code that updates it.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec, Gauge, GaugeVec, Histogram, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

// --- oracle ---

pub static ORACLE_GAS_PRICE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "router_oracle_gas_price_wei",
        "Last observed gas price in wei, by chain id",
        &["chain_id"]
    )
    .expect("router_oracle_gas_price_wei can be registered")
});

// --- tracker ---

pub static TRACKER_SYNC_LAG: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "router_tracker_sync_lag_blocks",
        "Blocks behind chain head the subgraph reports, by chain id",
        &["chain_id"]
    )
    .expect("router_tracker_sync_lag_blocks can be registered")
});

pub static TRACKER_POLL_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "router_tracker_poll_errors_total",
        "Transient polling failures, by chain id",
        &["chain_id"]
    )
    .expect("router_tracker_poll_errors_total can be registered")
});

// --- evaluator ---

pub static EVALUATOR_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "router_evaluator_requests_total",
        "Auction requests evaluated, by outcome",
        &["outcome"]
    )
    .expect("router_evaluator_requests_total can be registered")
});

pub static EVALUATOR_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "router_evaluator_latency_seconds",
        "Time to evaluate an auction request end-to-end"
    )
    .expect("router_evaluator_latency_seconds can be registered")
});

// --- lifecycle ---

pub static LIFECYCLE_ACTIVE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "router_lifecycle_active_transactions",
        "Number of in-memory lifecycle state machines currently tracked"
    )
    .expect("router_lifecycle_active_transactions can be registered")
});

pub static LIFECYCLE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "router_lifecycle_transitions_total",
        "State transitions, by resulting state",
        &["state"]
    )
    .expect("router_lifecycle_transitions_total can be registered")
});

// --- dispatcher ---

pub static DISPATCHER_QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "router_dispatcher_queue_depth",
        "Pending actions queued per chain",
        &["chain_id"]
    )
    .expect("router_dispatcher_queue_depth can be registered")
});

pub static DISPATCHER_SUBMIT_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "router_dispatcher_submit_latency_seconds",
        "Time from submission to confirmed receipt, by chain id",
        &["chain_id"]
    )
    .expect("router_dispatcher_submit_latency_seconds can be registered")
});

pub static DISPATCHER_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "router_dispatcher_retries_total",
        "Submission retries, by chain id",
        &["chain_id"]
    )
    .expect("router_dispatcher_retries_total can be registered")
});

/// Renders the default registry in Prometheus text exposition format, for
/// `GET /metrics`.
///
/// # Errors
/// Returns an error string if encoding fails (never expected in practice).
pub fn encode() -> Result<String, String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|err| err.to_string())?;
    String::from_utf8(buffer).map_err(|err| err.to_string())
}
