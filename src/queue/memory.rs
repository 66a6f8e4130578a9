//! # In-memory job queue.
//!
//! Reference [`JobQueue`] backend for tests, demos and single-process
//! deployments. All stores live behind one async mutex; every operation
//! takes the lock once and never awaits while holding it.
//!
//! Besides the producer-facing [`JobQueue`] surface it exposes a small
//! worker API (`lease_next` / `complete` / `fail`) so jobs can be driven to
//! the terminal states the persist cycle reconciles.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::QueueError;
use crate::queue::{BulkJobOp, Job, JobQueue, JobState};

#[derive(Default)]
struct State {
    waiting: VecDeque<Job>,
    delayed: Vec<Job>,
    active: Vec<Job>,
    completed: Vec<(Job, Instant)>,
    failed: Vec<(Job, Instant)>,
    ids: HashSet<String>,
    workers: usize,
    next_id: u64,
}

/// In-memory [`JobQueue`] implementation.
pub struct InMemoryQueue {
    state: Mutex<State>,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Attaches one worker to this queue (reflected in `worker_count`).
    pub async fn register_worker(&self) {
        self.state.lock().await.workers += 1;
    }

    /// Leases the oldest waiting job, moving it to [`JobState::Active`].
    pub async fn lease_next(&self) -> Option<Job> {
        let mut state = self.state.lock().await;
        let job = state.waiting.pop_front()?;
        state.active.push(job.clone());
        Some(job)
    }

    /// Marks an active job as completed.
    pub async fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let pos = state
            .active
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| QueueError::JobNotFound {
                id: id.to_string(),
                state: JobState::Active.as_str(),
            })?;
        let job = state.active.remove(pos);
        state.completed.push((job, Instant::now()));
        Ok(())
    }

    /// Marks an active job as failed with a reason.
    pub async fn fail(&self, id: &str, reason: impl Into<String>) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let pos = state
            .active
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| QueueError::JobNotFound {
                id: id.to_string(),
                state: JobState::Active.as_str(),
            })?;
        let mut job = state.active.remove(pos);
        job.failed_reason = Some(reason.into());
        state.failed.push((job, Instant::now()));
        Ok(())
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn add_bulk(&self, ops: Vec<BulkJobOp>) -> Result<Vec<Job>, QueueError> {
        let mut state = self.state.lock().await;
        let mut added = Vec::new();
        for op in ops {
            let id = match op.job_id {
                Some(id) => id,
                None => {
                    state.next_id += 1;
                    format!("{}:{}", op.name, state.next_id)
                }
            };
            // Re-adding a known id is a no-op, so producers can safely retry.
            if !state.ids.insert(id.clone()) {
                continue;
            }
            let job = Job {
                id,
                name: op.name,
                data: op.data,
                failed_reason: None,
            };
            state.waiting.push_back(job.clone());
            added.push(job);
        }
        Ok(added)
    }

    async fn count(&self, job_state: JobState) -> Result<usize, QueueError> {
        let state = self.state.lock().await;
        Ok(match job_state {
            JobState::Waiting => state.waiting.len(),
            JobState::Delayed => state.delayed.len(),
            JobState::Active => state.active.len(),
            JobState::Completed => state.completed.len(),
            JobState::Failed => state.failed.len(),
        })
    }

    async fn jobs_in_state(
        &self,
        job_state: JobState,
        limit: usize,
    ) -> Result<Vec<Job>, QueueError> {
        let state = self.state.lock().await;
        let jobs: Vec<Job> = match job_state {
            JobState::Waiting => state.waiting.iter().take(limit).cloned().collect(),
            JobState::Delayed => state.delayed.iter().take(limit).cloned().collect(),
            JobState::Active => state.active.iter().take(limit).cloned().collect(),
            JobState::Completed => state
                .completed
                .iter()
                .take(limit)
                .map(|(j, _)| j.clone())
                .collect(),
            JobState::Failed => state
                .failed
                .iter()
                .take(limit)
                .map(|(j, _)| j.clone())
                .collect(),
        };
        Ok(jobs)
    }

    async fn clean(
        &self,
        grace: Duration,
        job_state: JobState,
        limit: usize,
    ) -> Result<Vec<String>, QueueError> {
        let mut state = self.state.lock().await;
        let store = match job_state {
            JobState::Completed => &mut state.completed,
            JobState::Failed => &mut state.failed,
            // Non-terminal states are never cleaned.
            _ => return Ok(Vec::new()),
        };
        let now = Instant::now();
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(store.len());
        for (job, finished_at) in store.drain(..) {
            if removed.len() < limit && now.duration_since(finished_at) >= grace {
                removed.push(job.id);
            } else {
                kept.push((job, finished_at));
            }
        }
        *store = kept;
        for id in &removed {
            state.ids.remove(id);
        }
        Ok(removed)
    }

    async fn worker_count(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(name: &str, id: &str) -> BulkJobOp {
        BulkJobOp {
            name: name.into(),
            data: json!({ "_id": id }),
            job_id: Some(id.into()),
        }
    }

    #[tokio::test]
    async fn test_add_bulk_is_idempotent_by_id() {
        let queue = InMemoryQueue::new();
        let added = queue.add_bulk(vec![op("sync", "a"), op("sync", "b")]).await.unwrap();
        assert_eq!(added.len(), 2);
        let again = queue.add_bulk(vec![op("sync", "a"), op("sync", "c")]).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, "c");
        assert_eq!(queue.count(JobState::Waiting).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_add_bulk_assigns_id_when_missing() {
        let queue = InMemoryQueue::new();
        let added = queue
            .add_bulk(vec![BulkJobOp {
                name: "sync".into(),
                data: json!({}),
                job_id: None,
            }])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        assert!(added[0].id.starts_with("sync:"));
    }

    #[tokio::test]
    async fn test_lease_complete_fail_transitions() {
        let queue = InMemoryQueue::new();
        queue.add_bulk(vec![op("sync", "a"), op("sync", "b")]).await.unwrap();

        let first = queue.lease_next().await.unwrap();
        let second = queue.lease_next().await.unwrap();
        assert!(queue.lease_next().await.is_none());
        assert_eq!(queue.count(JobState::Active).await.unwrap(), 2);

        queue.complete(&first.id).await.unwrap();
        queue.fail(&second.id, "worker crashed").await.unwrap();
        assert_eq!(queue.count(JobState::Completed).await.unwrap(), 1);
        assert_eq!(queue.count(JobState::Failed).await.unwrap(), 1);

        let failed = queue.jobs_in_state(JobState::Failed, 10).await.unwrap();
        assert_eq!(failed[0].failed_reason.as_deref(), Some("worker crashed"));
    }

    #[tokio::test]
    async fn test_complete_unknown_job_is_an_error() {
        let queue = InMemoryQueue::new();
        let err = queue.complete("nope").await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_clean_honors_limit_and_frees_ids() {
        let queue = InMemoryQueue::new();
        queue
            .add_bulk(vec![op("sync", "a"), op("sync", "b"), op("sync", "c")])
            .await
            .unwrap();
        for _ in 0..3 {
            let job = queue.lease_next().await.unwrap();
            queue.complete(&job.id).await.unwrap();
        }

        let removed = queue
            .clean(Duration::ZERO, JobState::Completed, 2)
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.count(JobState::Completed).await.unwrap(), 1);

        // A cleaned id can be enqueued again.
        let readded = queue.add_bulk(vec![op("sync", &removed[0])]).await.unwrap();
        assert_eq!(readded.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_respects_grace() {
        let queue = InMemoryQueue::new();
        queue.add_bulk(vec![op("sync", "a")]).await.unwrap();
        let job = queue.lease_next().await.unwrap();
        queue.complete(&job.id).await.unwrap();

        let removed = queue
            .clean(Duration::from_secs(60), JobState::Completed, 10)
            .await
            .unwrap();
        assert!(removed.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let removed = queue
            .clean(Duration::from_secs(60), JobState::Completed, 10)
            .await
            .unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_count_tracks_registrations() {
        let queue = InMemoryQueue::new();
        assert_eq!(queue.worker_count().await.unwrap(), 0);
        queue.register_worker().await;
        queue.register_worker().await;
        assert_eq!(queue.worker_count().await.unwrap(), 2);
    }
}
