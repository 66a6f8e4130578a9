//! # intervisor
//!
//! **Intervisor** is a small coordination library for named recurring tasks.
//!
//! It guarantees that each named interval runs **at most once concurrently**
//! process-wide, gates execution on async preconditions (including dependency
//! health checks), forcibly terminates runaway attempts, and publishes a fixed
//! lifecycle of events for observability. On top of that core it ships a
//! produce/persist pipeline ([`ProducerDriver`]) that polls an application
//! source for pending work, enqueues it into a job queue with duplicate
//! suppression, and reconciles terminal queue entries back to the application.
//!
//! ## Architecture
//! ```text
//!  ┌─────────────────┐   ┌─────────────────┐
//!  │ Interval "A"    │   │ Interval "B"    │   (one mutex per name,
//!  │ (tick fn + gate)│   │ (tick fn + gate)│    shared process-wide)
//!  └───────┬─────────┘   └───────┬─────────┘
//!          ▼                     ▼
//!  ┌───────────────────────────────────────────────────────┐
//!  │ SchedulerContext                                      │
//!  │  - mutex registry (name → lock)                       │
//!  │  - init-emitted set, log throttle                     │
//!  │  - registrar slot + pending registrations             │
//!  │  - health check + availability bus                    │
//!  │  - event Bus (broadcast)                              │
//!  └───────┬───────────────────────────────┬───────────────┘
//!          ▼                               ▼
//!   TokioRegistrar                     subscribers
//!   (one timer loop per name,          (metrics, logs, tests)
//!    each tick → service.run())
//!
//! run() state machine, per attempt:
//!   Init(once) → Disabled
//!             → AlreadyRunning                      (overlapping tick dropped)
//!             → ConditionsNotMet [+ MicroservicesUnresponsive]
//!             → Started → Success | Terminated | Error
//!                       → [LongRunning] → Finish
//! ```
//!
//! ## Producer pipeline
//! ```text
//!  "<Name>.produce" tick:                  "<Name>.persist" tick:
//!    workers gauge (best effort)             skip while paused
//!    paused? → 0                             completed batch → on_success → clean
//!    outstanding ≥ queue_size? → 0           failed batch    → on_fail    → clean
//!    pending_items() (truncated)             evict reconciled unique keys
//!    duplicate suppression
//!    mark processing (pre/post)
//!    add_bulk (job_id = unique key)
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use intervisor::{
//!     IntervalOptions, SchedulerContext, SingletonIntervalService, TickFn, TokioRegistrar,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let ctx = SchedulerContext::new();
//!     ctx.set_registrar(Arc::new(TokioRegistrar::new()));
//!
//!     let svc = SingletonIntervalService::new(
//!         &ctx,
//!         "Demo.tick",
//!         Duration::from_secs(3),
//!         TickFn::arc(|_token| async move {
//!             // do one unit of work...
//!             Ok(())
//!         }),
//!         IntervalOptions::default(),
//!     );
//!     svc.register();
//! }
//! ```

mod context;
mod error;
mod events;
mod interval;
mod metrics;
mod producer;
mod queue;
mod throttle;

// ---- Public re-exports ----

pub use context::{HealthCheck, HealthEvent, SchedulerContext};
pub use error::{ProducerError, QueueError, TickError};
pub use events::{Bus, Event, EventKind};
pub use interval::{
    ConditionFn, IntervalOptions, IntervalTask, Registrar, RunOutcome, SingletonIntervalService,
    TaskRef, TickFn, TokioRegistrar, CONDITION_TIMEOUT, INTERVAL_TERMINATION_FACTOR,
};
pub use metrics::{init_metrics, REGISTRY};
pub use producer::{JobsProducer, MarkProcessingOrder, ProducerDriver};
pub use queue::{BulkJobOp, InMemoryQueue, Job, JobQueue, JobState};
pub use throttle::LogThrottle;
