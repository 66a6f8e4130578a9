//! # Produce/persist driver.
//!
//! [`ProducerDriver`] turns a [`JobsProducer`] into two singleton intervals,
//! `"<Name>.produce"` and `"<Name>.persist"`, plus a watcher on the
//! context's availability bus.
//!
//! ```text
//! produce cycle:                          persist cycle:
//!   refresh worker gauge (best effort)      skip while paused
//!   paused? → 0                             completed batch → on_success → clean
//!   outstanding ≥ queue_size? → 0           failed batch    → on_fail    → clean
//!   pending_items() (truncated)             evict reconciled unique keys
//!   duplicate suppression
//!   mark processing (pre/post)
//!   add_bulk (job_id = unique key)
//! ```
//!
//! ## Rules
//! - Cycle errors never propagate: a failed fetch, claim or enqueue means
//!   zero progress this cycle and the next timer tick retries.
//! - A reconciliation callback error leaves the batch in the queue; nothing
//!   is cleaned that the application has not acknowledged.
//! - The scheduled-keys suppression set only grows until reconciliation,
//!   which evicts exactly the cleaned ids, keeping the set bounded by the
//!   number of in-flight jobs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::{HealthEvent, SchedulerContext};
use crate::metrics;
use crate::interval::{IntervalOptions, SingletonIntervalService, TickFn};
use crate::producer::{JobsProducer, MarkProcessingOrder};
use crate::queue::{render_scalar, value_at_path, BulkJobOp, JobQueue, JobState};

/// Throttle window for "no pending items" heartbeat logs.
const NO_PENDING_LOG_WINDOW: Duration = Duration::from_secs(20);

/// Throttle window for "paused" logs.
const PAUSED_LOG_WINDOW: Duration = Duration::from_secs(30);

/// Drives one [`JobsProducer`] against one [`JobQueue`].
pub struct ProducerDriver {
    ctx: Arc<SchedulerContext>,
    producer: Arc<dyn JobsProducer>,
    queue: Arc<dyn JobQueue>,
    paused_by: Mutex<Option<String>>,
    scheduled_keys: Mutex<HashSet<String>>,
}

impl ProducerDriver {
    /// Binds a producer to a queue within a scheduler context.
    pub fn new(
        ctx: &Arc<SchedulerContext>,
        producer: Arc<dyn JobsProducer>,
        queue: Arc<dyn JobQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::clone(ctx),
            producer,
            queue,
            paused_by: Mutex::new(None),
            scheduled_keys: Mutex::new(HashSet::new()),
        })
    }

    /// Registers the produce and persist intervals (each with its own mutex,
    /// both gated on the producer's dependency microservices) and starts the
    /// availability watcher.
    pub fn spawn(self: &Arc<Self>) {
        self.spawn_availability_watch();

        let microservices = self.producer.microservice_dependencies();

        let produce_name = format!("{}.produce", self.producer.name());
        let driver = Arc::clone(self);
        let produce = SingletonIntervalService::new(
            &self.ctx,
            &produce_name,
            self.producer.production_frequency(),
            TickFn::arc(move |_token| {
                let driver = Arc::clone(&driver);
                async move {
                    driver.produce().await;
                    Ok(())
                }
            }),
            IntervalOptions {
                microservices: microservices.clone(),
                ..Default::default()
            },
        );
        produce.register();

        let persist_name = format!("{}.persist", self.producer.name());
        let driver = Arc::clone(self);
        let persist = SingletonIntervalService::new(
            &self.ctx,
            &persist_name,
            self.producer.persistence_frequency(),
            TickFn::arc(move |_token| {
                let driver = Arc::clone(&driver);
                async move {
                    driver.persist().await;
                    Ok(())
                }
            }),
            IntervalOptions {
                microservices,
                ..Default::default()
            },
        );
        persist.register();
    }

    /// Runs one produce cycle; returns the number of jobs enqueued.
    ///
    /// Never returns an error: every failure path is logged and counts as
    /// zero progress.
    pub async fn produce(&self) -> usize {
        let started = Instant::now();
        let enqueued = self.try_produce().await;
        metrics::set_produce_duration(
            self.producer.name(),
            self.producer.job_name(),
            started.elapsed(),
        );
        enqueued
    }

    async fn try_produce(&self) -> usize {
        let producer = self.producer.name();
        let queue_label = self.producer.job_name();

        // Worker gauge refresh is best effort; a failure must not stop the cycle.
        match self.queue.worker_count().await {
            Ok(workers) => metrics::set_queue_workers(producer, queue_label, workers),
            Err(err) => debug!(%producer, %err, "could not read worker count"),
        }

        if let Some(cause) = self.paused_cause() {
            let key = format!("produce-paused:{producer}");
            if self.ctx.throttle().allow(&key, PAUSED_LOG_WINDOW) {
                warn!(%producer, microservice = %cause, "production paused, dependency unavailable");
            }
            return 0;
        }

        let outstanding = match self.outstanding().await {
            Ok(n) => n,
            Err(err) => {
                error!(%producer, %err, "could not read queue depth, skipping cycle");
                return 0;
            }
        };
        metrics::set_queue_outstanding(producer, queue_label, outstanding);
        let queue_size = self.producer.queue_size();
        if outstanding >= queue_size {
            debug!(%producer, outstanding, queue_size, "queue full, skipping cycle");
            return 0;
        }

        let fetch_started = Instant::now();
        let fetched = self.producer.pending_items().await;
        metrics::set_fetch_duration(producer, queue_label, fetch_started.elapsed());
        let mut items = match fetched {
            Ok(items) => items,
            Err(err) => {
                error!(%producer, %err, "pending items fetch failed");
                return 0;
            }
        };
        // The outstanding check above is the only admission gate; one cycle
        // enqueues at most queue_size items, so outstanding may reach
        // 2 x queue_size - 1.
        items.truncate(queue_size);

        if items.is_empty() {
            let key = format!("no-pending:{producer}");
            if self.ctx.throttle().allow(&key, NO_PENDING_LOG_WINDOW) {
                debug!(%producer, "no pending items");
            }
            return 0;
        }

        let unique_key = self.producer.unique_key();
        if self.producer.forbid_duplicates() {
            let known = match self.known_keys(2 * queue_size).await {
                Ok(known) => known,
                Err(err) => {
                    error!(%producer, %err, "could not read waiting jobs, skipping cycle");
                    return 0;
                }
            };
            let before = items.len();
            items.retain(|item| {
                match value_at_path(item, unique_key).and_then(render_scalar) {
                    Some(key) => !known.contains(&key),
                    // No key means no identity to suppress on.
                    None => true,
                }
            });
            let dropped = before - items.len();
            if dropped > 0 {
                debug!(%producer, dropped, "suppressed duplicate pending items");
            }
            if items.is_empty() {
                return 0;
            }
        }

        let mut ops = Vec::with_capacity(items.len());
        let mut keys = Vec::with_capacity(items.len());
        let mut marked_items = Vec::with_capacity(items.len());
        for item in items {
            // An item without an identity cannot be tracked; skip it alone.
            let id = match value_at_path(&item, unique_key).and_then(render_scalar) {
                Some(id) => id,
                None => {
                    error!(%producer, unique_key, "pending item lacks a unique key, skipping item");
                    continue;
                }
            };
            ops.push(BulkJobOp {
                name: self.producer.job_name().to_string(),
                data: item.clone(),
                job_id: Some(id.clone()),
            });
            keys.push(id);
            marked_items.push(item);
        }
        if ops.is_empty() {
            return 0;
        }
        let items = marked_items;

        if self.producer.mark_processing_order() == MarkProcessingOrder::PreProduce
            && !self.mark_processing(&items).await
        {
            return 0;
        }

        let added = match self.queue.add_bulk(ops).await {
            Ok(added) => added,
            Err(err) => {
                error!(%producer, %err, "bulk enqueue failed");
                return 0;
            }
        };

        if self.producer.mark_processing_order() == MarkProcessingOrder::PostProduce && !added.is_empty() {
            // The jobs are already queued; a failed claim is logged and the
            // next fetch may return the items again.
            let payloads: Vec<serde_json::Value> =
                added.iter().map(|job| job.data.clone()).collect();
            self.mark_processing(&payloads).await;
        }

        // Only suppressing producers ever read the set back.
        if self.producer.forbid_duplicates() {
            let mut scheduled = self.scheduled_keys.lock().unwrap();
            scheduled.extend(keys);
        }

        info!(%producer, count = added.len(), "enqueued pending items");
        added.len()
    }

    /// Runs one persist cycle; returns `(succeeded, failed)` reconciliation
    /// counts.
    pub async fn persist(&self) -> (usize, usize) {
        let started = Instant::now();
        let producer = self.producer.name();
        let queue_label = self.producer.job_name();

        if let Some(cause) = self.paused_cause() {
            let key = format!("persist-paused:{producer}");
            if self.ctx.throttle().allow(&key, PAUSED_LOG_WINDOW) {
                warn!(%producer, microservice = %cause, "persistence paused, dependency unavailable");
            }
            metrics::set_persist_duration(producer, queue_label, started.elapsed());
            return (0, 0);
        }

        let batch = 2 * self.producer.queue_size();
        let succeeded = self.reconcile(JobState::Completed, batch).await;
        let failed = self.reconcile(JobState::Failed, batch).await;

        metrics::set_persist_duration(producer, queue_label, started.elapsed());
        (succeeded, failed)
    }

    async fn reconcile(&self, state: JobState, batch: usize) -> usize {
        let producer = self.producer.name();
        let queue_label = self.producer.job_name();

        let jobs = match self.queue.jobs_in_state(state, batch).await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(%producer, state = state.as_str(), %err, "could not fetch jobs for reconciliation");
                return 0;
            }
        };
        if jobs.is_empty() {
            return 0;
        }
        let fetched = jobs.len();

        // Label breakdowns are taken before the callback consumes the batch.
        let mut label_values = Vec::new();
        for label in self.producer.metrics_labels() {
            for job in &jobs {
                // A payload without the declared path still counts, under "".
                let value = value_at_path(&job.data, &label)
                    .and_then(render_scalar)
                    .unwrap_or_default();
                label_values.push((label.clone(), value));
            }
        }

        let (outcome, result) = match state {
            JobState::Completed => ("succeeded", self.producer.on_success(jobs).await),
            _ => ("failed", self.producer.on_fail(jobs).await),
        };
        let count = match result {
            Ok(count) => count,
            Err(err) => {
                // The application did not acknowledge the batch; leave it
                // queued and retry on the next cycle.
                error!(%producer, state = state.as_str(), %err, "reconciliation callback failed, leaving jobs in queue");
                return 0;
            }
        };

        match state {
            JobState::Completed => metrics::add_jobs_succeeded(producer, queue_label, count),
            _ => metrics::add_jobs_failed(producer, queue_label, count),
        }
        for (label, value) in label_values {
            metrics::inc_jobs_by_label(producer, queue_label, outcome, &label, &value);
        }

        match self.queue.clean(Duration::ZERO, state, fetched).await {
            Ok(removed) => {
                let mut scheduled = self.scheduled_keys.lock().unwrap();
                for id in &removed {
                    scheduled.remove(id);
                }
            }
            Err(err) => {
                error!(%producer, state = state.as_str(), %err, "could not clean reconciled jobs");
            }
        }
        count
    }

    async fn mark_processing(&self, items: &[serde_json::Value]) -> bool {
        let started = Instant::now();
        let result = self.producer.mark_items_as_processing(items).await;
        metrics::set_mark_duration(
            self.producer.name(),
            self.producer.job_name(),
            started.elapsed(),
        );
        if let Err(err) = result {
            error!(producer = %self.producer.name(), %err, "mark as processing failed");
            return false;
        }
        true
    }

    async fn outstanding(&self) -> Result<usize, crate::error::QueueError> {
        let waiting = self.queue.count(JobState::Waiting).await?;
        let delayed = self.queue.count(JobState::Delayed).await?;
        let active = self.queue.count(JobState::Active).await?;
        Ok(waiting + delayed + active)
    }

    /// Unique keys already represented in the queue or scheduled earlier.
    async fn known_keys(&self, limit: usize) -> Result<HashSet<String>, crate::error::QueueError> {
        let unique_key = self.producer.unique_key();
        let waiting = self.queue.jobs_in_state(JobState::Waiting, limit).await?;
        let mut known: HashSet<String> = waiting
            .iter()
            .filter_map(|job| job.unique_value(unique_key))
            .collect();
        known.extend(self.scheduled_keys.lock().unwrap().iter().cloned());
        Ok(known)
    }

    fn paused_cause(&self) -> Option<String> {
        self.paused_by.lock().unwrap().clone()
    }

    fn spawn_availability_watch(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        let mut rx = self.ctx.subscribe_health();
        let token = self.ctx.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => driver.on_health_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(producer = %driver.producer.name(), skipped, "availability watcher lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// Applies one availability transition. Pausing remembers the first
    /// unavailable dependency; only that dependency coming back resumes.
    fn on_health_event(&self, event: &HealthEvent) {
        if !self
            .producer
            .microservice_dependencies()
            .iter()
            .any(|dep| dep == &event.microservice)
        {
            return;
        }
        let mut paused = self.paused_by.lock().unwrap();
        if !event.available {
            if paused.is_none() {
                warn!(
                    producer = %self.producer.name(),
                    microservice = %event.microservice,
                    "dependency lost, pausing producer"
                );
                *paused = Some(event.microservice.clone());
            }
        } else if paused.as_deref() == Some(event.microservice.as_str()) {
            info!(
                producer = %self.producer.name(),
                microservice = %event.microservice,
                "dependency recovered, resuming producer"
            );
            *paused = None;
        }
    }
}
