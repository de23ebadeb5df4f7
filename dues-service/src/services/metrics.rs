//! Prometheus metrics for dues-service.

use crate::error::DuesError;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_counter,
    Counter, CounterVec, HistogramVec, IntCounter, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Instant;

/// Engine operation counter by operation and outcome.
pub static OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dues_operations_total",
        "Total number of engine operations",
        &["operation", "status"]  // status is "ok" or the error code
    )
    .expect("Failed to register operations_total")
});

/// Engine operation duration histogram by operation.
pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dues_operation_duration_seconds",
        "Engine operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_duration")
});

/// Charges created by mass generation.
pub static CHARGES_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "dues_charges_created_total",
        "Total number of charges created"
    )
    .expect("Failed to register charges_created")
});

/// Reference lifecycle events.
pub static REFERENCE_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dues_references_total",
        "Payment reference lifecycle events",
        &["event"]  // issued, redeemed, expired, cancelled
    )
    .expect("Failed to register references_total")
});

/// Cash collected through redemptions.
pub static AMOUNT_COLLECTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "dues_amount_collected_total",
        "Total amount collected through redeemed references"
    )
    .expect("Failed to register amount_collected")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dues_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&OPERATIONS_TOTAL);
    Lazy::force(&OPERATION_DURATION);
    Lazy::force(&CHARGES_CREATED);
    Lazy::force(&REFERENCE_EVENTS);
    Lazy::force(&AMOUNT_COLLECTED);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Record the outcome and latency of one engine operation.
pub fn record_operation(operation: &str, status: &str, seconds: f64) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(seconds);
}

/// Run one engine operation and record its outcome under `operation`.
pub async fn track<T, F>(operation: &str, fut: F) -> Result<T, DuesError>
where
    F: Future<Output = Result<T, DuesError>>,
{
    let start = Instant::now();
    let result = fut.await;
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    record_operation(operation, status, start.elapsed().as_secs_f64());
    result
}

pub fn record_charges_created(count: u64) {
    CHARGES_CREATED.inc_by(count);
}

pub fn record_reference_event(event: &str, count: usize) {
    REFERENCE_EVENTS
        .with_label_values(&[event])
        .inc_by(count as f64);
}

pub fn record_amount_collected(amount: Decimal) {
    AMOUNT_COLLECTED.inc_by(amount.to_f64().unwrap_or_default());
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
