//! Prometheus metrics for the producer pipeline.
//!
//! All metrics share one registry and the `intervisor` prefix. Durations are
//! gauges holding the latest cycle's value; success/fail totals are counters,
//! with an additional breakdown vec keyed by the declared payload labels
//! (dot paths are flattened with `_`).

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

/// Metric name prefix for all intervisor metrics
const PREFIX: &str = "intervisor";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Producer cycle metrics
    pub static ref PRODUCE_DURATION_SECONDS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_produce_duration_seconds"), "Duration of the last produce cycle"),
        &["producer", "queue"]
    ).expect("Failed to create produce_duration_seconds metric");

    pub static ref PERSIST_DURATION_SECONDS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_persist_duration_seconds"), "Duration of the last persist cycle"),
        &["producer", "queue"]
    ).expect("Failed to create persist_duration_seconds metric");

    pub static ref FETCH_DURATION_SECONDS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_fetch_duration_seconds"), "Duration of the last pending-items fetch"),
        &["producer", "queue"]
    ).expect("Failed to create fetch_duration_seconds metric");

    pub static ref MARK_DURATION_SECONDS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_mark_duration_seconds"), "Duration of the last mark-as-processing call"),
        &["producer", "queue"]
    ).expect("Failed to create mark_duration_seconds metric");

    // Queue state metrics
    pub static ref QUEUE_OUTSTANDING_JOBS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_queue_outstanding_jobs"), "Waiting + delayed + active jobs at last produce cycle"),
        &["producer", "queue"]
    ).expect("Failed to create queue_outstanding_jobs metric");

    pub static ref QUEUE_WORKERS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_queue_workers"), "Workers attached to the queue at last produce cycle"),
        &["producer", "queue"]
    ).expect("Failed to create queue_workers metric");

    // Reconciliation metrics
    pub static ref JOBS_SUCCEEDED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_succeeded_total"), "Jobs reconciled as succeeded"),
        &["producer", "queue"]
    ).expect("Failed to create jobs_succeeded_total metric");

    pub static ref JOBS_FAILED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_failed_total"), "Jobs reconciled as failed"),
        &["producer", "queue"]
    ).expect("Failed to create jobs_failed_total metric");

    pub static ref JOBS_BY_LABEL_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_by_label_total"), "Reconciled jobs broken down by declared payload labels"),
        &["producer", "queue", "outcome", "label", "value"]
    ).expect("Failed to create jobs_by_label_total metric");
}

/// Registers all metrics with [`struct@REGISTRY`].
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(PRODUCE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PERSIST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(FETCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(MARK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_OUTSTANDING_JOBS.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_WORKERS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_SUCCEEDED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FAILED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_BY_LABEL_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Flattens a dot-path label name into a Prometheus-safe label value.
pub(crate) fn sanitize_label(path: &str) -> String {
    path.replace('.', "_")
}

pub(crate) fn set_produce_duration(producer: &str, queue: &str, duration: Duration) {
    PRODUCE_DURATION_SECONDS
        .with_label_values(&[producer, queue])
        .set(duration.as_secs_f64());
}

pub(crate) fn set_persist_duration(producer: &str, queue: &str, duration: Duration) {
    PERSIST_DURATION_SECONDS
        .with_label_values(&[producer, queue])
        .set(duration.as_secs_f64());
}

pub(crate) fn set_fetch_duration(producer: &str, queue: &str, duration: Duration) {
    FETCH_DURATION_SECONDS
        .with_label_values(&[producer, queue])
        .set(duration.as_secs_f64());
}

pub(crate) fn set_mark_duration(producer: &str, queue: &str, duration: Duration) {
    MARK_DURATION_SECONDS
        .with_label_values(&[producer, queue])
        .set(duration.as_secs_f64());
}

pub(crate) fn set_queue_outstanding(producer: &str, queue: &str, outstanding: usize) {
    QUEUE_OUTSTANDING_JOBS
        .with_label_values(&[producer, queue])
        .set(outstanding as f64);
}

pub(crate) fn set_queue_workers(producer: &str, queue: &str, workers: usize) {
    QUEUE_WORKERS
        .with_label_values(&[producer, queue])
        .set(workers as f64);
}

pub(crate) fn add_jobs_succeeded(producer: &str, queue: &str, count: usize) {
    JOBS_SUCCEEDED_TOTAL
        .with_label_values(&[producer, queue])
        .inc_by(count as f64);
}

pub(crate) fn add_jobs_failed(producer: &str, queue: &str, count: usize) {
    JOBS_FAILED_TOTAL
        .with_label_values(&[producer, queue])
        .inc_by(count as f64);
}

pub(crate) fn inc_jobs_by_label(
    producer: &str,
    queue: &str,
    outcome: &str,
    label: &str,
    value: &str,
) {
    JOBS_BY_LABEL_TOTAL
        .with_label_values(&[producer, queue, outcome, &sanitize_label(label), value])
        .inc();
}
