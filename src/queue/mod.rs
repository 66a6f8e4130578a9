//! Job queue port and the in-memory reference implementation.
//!
//! Producers only need the [`JobQueue`] operations; workers drive jobs to
//! terminal states through the backend's own consuming API (see
//! [`InMemoryQueue`]'s lease/complete/fail methods).

mod job;
mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;

pub use job::{BulkJobOp, Job, JobState};
pub(crate) use job::{render_scalar, value_at_path};
pub use memory::InMemoryQueue;

/// Producer-facing surface of a job queue backend.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Enqueues a batch. Ops whose `job_id` already exists in the queue are
    /// skipped; returns the jobs actually added.
    async fn add_bulk(&self, ops: Vec<BulkJobOp>) -> Result<Vec<Job>, QueueError>;

    /// Number of jobs currently in `state`.
    async fn count(&self, state: JobState) -> Result<usize, QueueError>;

    /// Up to `limit` jobs currently in `state`, oldest first.
    async fn jobs_in_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Removes up to `limit` jobs that have been in terminal `state` for at
    /// least `grace`; returns the removed job ids.
    async fn clean(
        &self,
        grace: Duration,
        state: JobState,
        limit: usize,
    ) -> Result<Vec<String>, QueueError>;

    /// Number of workers currently attached to this queue.
    async fn worker_count(&self) -> Result<usize, QueueError>;
}
