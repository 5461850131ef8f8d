//! Prometheus metrics for follow-service.
//!
//! Tracks follow/unfollow outcomes, counter floor hits and reconciliation
//! corrections, and exposes an HTTP handler for the `/metrics` endpoint.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::models::CounterKind;
use crate::error::codes;

/// Follow/unfollow attempts by operation and result code
static FOLLOW_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "follow_operations_total",
        "Follow and unfollow operations by result",
        &["operation", "result"]
    )
    .expect("failed to register follow_operations_total")
});

/// Decrements that were clamped at zero
static COUNTER_FLOOR_HITS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "follow_counter_floor_hits_total",
        "Counter decrements clamped at zero (indicates drift)",
        &["counter"]
    )
    .expect("failed to register follow_counter_floor_hits_total")
});

/// Counters overwritten by reconciliation
static DRIFT_CORRECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "follow_counter_drift_corrections_total",
        "Denormalized counters corrected by reconciliation",
        &["counter"]
    )
    .expect("failed to register follow_counter_drift_corrections_total")
});

/// Reconciliation runs (success/error)
static RECONCILE_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "follow_reconcile_runs_total",
        "Counter reconciliation runs (success/error)",
        &["status"]
    )
    .expect("failed to register follow_reconcile_runs_total")
});

static RECONCILE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "follow_reconcile_duration_seconds",
        "Duration of full counter reconciliation runs",
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("failed to register follow_reconcile_duration_seconds")
});

/// Record a follow/unfollow outcome; `result` is "ok" or a stable error code
pub fn record_operation(operation: &str, result: &str) {
    FOLLOW_OPERATIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

/// Record a decrement that hit the zero floor; logged on the `audit` target.
pub fn record_floor_hit(user_id: Uuid, counter: CounterKind) {
    COUNTER_FLOOR_HITS_TOTAL
        .with_label_values(&[counter.as_str()])
        .inc();
    tracing::warn!(
        target: "audit",
        code = codes::COUNTER_DRIFT,
        user_id = %user_id,
        counter = counter.as_str(),
        "Counter decrement clamped at zero"
    );
}

pub fn record_drift_correction(counter: CounterKind) {
    DRIFT_CORRECTIONS_TOTAL
        .with_label_values(&[counter.as_str()])
        .inc();
}

pub fn record_reconcile_run(status: &str, duration: Duration) {
    RECONCILE_RUNS_TOTAL.with_label_values(&[status]).inc();
    RECONCILE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
