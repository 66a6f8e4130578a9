//! # Application contract for job production.
//!
//! A [`JobsProducer`] is the application's side of the pipeline: where
//! pending work comes from, how items are claimed, and what happens when a
//! job reaches a terminal state. Everything else (cadence, backpressure,
//! duplicate suppression, pause protocol, metrics) is the
//! [`ProducerDriver`](crate::ProducerDriver)'s job.
//!
//! Only six methods are required; the policy hooks have defaults matching
//! the common case of a small, retry-friendly poll loop.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProducerError;
use crate::queue::Job;

/// When `mark_items_as_processing` runs relative to the enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkProcessingOrder {
    /// Claim items before enqueueing; a failed claim aborts the cycle.
    PreProduce,
    /// Enqueue first, then claim; a failed claim is logged, the jobs stay.
    PostProduce,
}

/// # Source and sink of one job pipeline.
///
/// Payloads are opaque JSON documents. The driver identifies them by the
/// field at [`unique_key`](JobsProducer::unique_key) (a dot path) and uses
/// that value as the queue job id, so re-producing an item is idempotent.
#[async_trait]
pub trait JobsProducer: Send + Sync + 'static {
    /// Producer name; interval names are derived as `"<name>.produce"` and
    /// `"<name>.persist"`.
    fn name(&self) -> &str;

    /// Job name workers consume under, also the queue label in metrics.
    fn job_name(&self) -> &str;

    /// Fetches items awaiting production. The driver truncates the result to
    /// the queue capacity left this cycle.
    async fn pending_items(&self) -> Result<Vec<Value>, ProducerError>;

    /// Claims items so the next fetch does not return them again.
    async fn mark_items_as_processing(&self, items: &[Value]) -> Result<(), ProducerError>;

    /// Reconciles jobs that completed successfully. Returns how many were
    /// persisted; the driver removes exactly the passed jobs from the queue
    /// afterwards.
    async fn on_success(&self, jobs: Vec<Job>) -> Result<usize, ProducerError>;

    /// Reconciles jobs that failed. Same contract as
    /// [`on_success`](JobsProducer::on_success).
    async fn on_fail(&self, jobs: Vec<Job>) -> Result<usize, ProducerError>;

    // ---- Policy hooks ----

    /// Suppress items whose unique key is already queued or scheduled.
    fn forbid_duplicates(&self) -> bool {
        false
    }

    /// Ordering of the claim relative to the enqueue.
    fn mark_processing_order(&self) -> MarkProcessingOrder {
        MarkProcessingOrder::PostProduce
    }

    /// Dot path of the unique-key field inside each payload.
    fn unique_key(&self) -> &str {
        "_id"
    }

    /// Ceiling on outstanding (waiting + delayed + active) jobs.
    fn queue_size(&self) -> usize {
        100
    }

    /// Cadence of the produce interval.
    fn production_frequency(&self) -> Duration {
        Duration::from_secs(3)
    }

    /// Cadence of the persist interval.
    fn persistence_frequency(&self) -> Duration {
        Duration::from_secs(3)
    }

    /// Payload dot paths broken out as metric labels on reconciliation.
    fn metrics_labels(&self) -> Vec<String> {
        Vec::new()
    }

    /// Dependency microservices gating both intervals and driving the pause
    /// protocol.
    fn microservice_dependencies(&self) -> Vec<String> {
        Vec::new()
    }
}
