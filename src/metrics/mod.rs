//! Prometheus metrics for publish runs
//!
//! This module tracks:
//! - Publish runs by final status
//! - Layers processed, per target, and layers finishing with errors
//! - Time spent publishing a single layer
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct PublishMetrics {
    runs: CounterVec,
    layers: CounterVec,
    layer_errors: CounterVec,
    layer_duration: HistogramVec,
}

static PUBLISH_METRICS: OnceLock<PublishMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all Prometheus metrics
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = PublishMetrics {
        runs: register_counter_vec!(
            "geobridge_publish_runs_total",
            "Publish runs by final status",
            &["status"]
        )?,
        layers: register_counter_vec!(
            "geobridge_layers_processed_total",
            "Layers processed by a publish run",
            &["target"]
        )?,
        layer_errors: register_counter_vec!(
            "geobridge_layer_errors_total",
            "Layers that finished with at least one error",
            &["target"]
        )?,
        layer_duration: register_histogram_vec!(
            "geobridge_layer_duration_seconds",
            "Time spent publishing one layer",
            &["target"],
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
        )?,
    };

    PUBLISH_METRICS
        .set(metrics)
        .map_err(|_| "Publish metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    PUBLISH_METRICS.get().is_some()
}

// ============================================================================
// Recording
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the final status of a publish run
pub fn record_run(status: &str) {
    if let Some(m) = PUBLISH_METRICS.get() {
        m.runs.with_label_values(&[status]).inc();
    }
}

/// Record one processed layer
///
/// `target` names what was published: `data`, `symbology` or `metadata`.
pub fn record_layer(target: &str, duration_secs: f64, had_errors: bool) {
    let Some(m) = PUBLISH_METRICS.get() else {
        return;
    };

    m.layers.with_label_values(&[target]).inc();
    m.layer_duration
        .with_label_values(&[target])
        .observe(duration_secs);
    if had_errors {
        m.layer_errors.with_label_values(&[target]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
