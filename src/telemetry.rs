//! Prometheus metrics for the credential pool.
//!
//! Registered once in the global default registry and rendered by the admin
//! API's `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_gauge_vec, register_int_counter_vec, Encoder, GaugeVec, IntCounterVec,
    TextEncoder,
};

use crate::models::PoolMetrics;

static SELECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("keypool_selections_total", "Credentials handed out by select_one"),
        &["service"]
    )
    .expect("failed to register keypool_selections_total")
});

static DEACTIVATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("keypool_deactivations_total", "Credentials deactivated by the pool"),
        &["service"]
    )
    .expect("failed to register keypool_deactivations_total")
});

static UPSTREAM_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "keypool_upstream_attempts_total",
            "Upstream call attempts by outcome (success, rotate, transient, fatal)"
        ),
        &["service", "outcome"]
    )
    .expect("failed to register keypool_upstream_attempts_total")
});

static POOL_GAUGES: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!("keypool_pool_state", "Latest pool metrics snapshot"),
        &["service", "field"]
    )
    .expect("failed to register keypool_pool_state")
});

pub fn record_selection(service: &str) {
    SELECTIONS.with_label_values(&[service]).inc();
}

pub fn record_deactivation(service: &str) {
    DEACTIVATIONS.with_label_values(&[service]).inc();
}

pub fn record_attempt(service: &str, outcome: &str) {
    UPSTREAM_ATTEMPTS.with_label_values(&[service, outcome]).inc();
}

pub fn publish_pool_metrics(m: &PoolMetrics) {
    let fields: [(&str, f64); 6] = [
        ("total", m.total_credentials as f64),
        ("active", m.active_credentials as f64),
        ("healthy", m.healthy_credentials as f64),
        ("total_usage", m.total_usage as f64),
        ("error_rate", m.error_rate),
        ("system_healthy", if m.system_healthy { 1.0 } else { 0.0 }),
    ];
    for (field, value) in fields {
        POOL_GAUGES
            .with_label_values(&[m.service_name.as_str(), field])
            .set(value);
    }
}

#[cfg(test)]
pub(crate) fn selections(service: &str) -> u64 {
    SELECTIONS.with_label_values(&[service]).get()
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::error!("failed to encode prometheus metrics: {}", e);
    }
    String::from_utf8(buf).unwrap_or_default()
}
