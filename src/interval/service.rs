//! # Singleton interval service.
//!
//! [`SingletonIntervalService`] binds a name, a recurrence period and an
//! [`IntervalTask`](crate::IntervalTask) into a unit the registrar fires on a
//! timer. Each attempt goes through a fixed state machine:
//!
//! ```text
//! Init(once) → Disabled
//!           → AlreadyRunning                       (mutex held, tick dropped)
//!           → ConditionsNotMet [+ MicroservicesUnresponsive]
//!           → Started → Success | Terminated | Error
//!                     → [LongRunning] → Finish
//! ```
//!
//! ## Rules
//! - **At most once concurrently**: the per-name mutex lives on the
//!   [`SchedulerContext`](crate::SchedulerContext); an overlapping tick is
//!   dropped, never queued.
//! - **Bounded runtime**: the bound function is raced against
//!   `termination_factor × interval`. On timeout its child token is cancelled
//!   and the future is dropped, so the work is aborted rather than left
//!   running behind the abandoned attempt.
//! - **Never crashes the host**: task errors become events and logs; `run()`
//!   returns a [`RunOutcome`] but no `Err`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

use crate::context::SchedulerContext;
use crate::error::TickError;
use crate::events::{Event, EventKind};
use crate::interval::conditions::{ConditionFn, ConditionSet, Unmet};
use crate::interval::task::TaskRef;

/// Default multiple of the nominal interval after which an attempt is
/// forcibly terminated.
pub const INTERVAL_TERMINATION_FACTOR: u32 = 20;

/// Window after process start during which unmet conditions are logged at
/// debug level only (dependencies are expected to still be coming up).
const STARTUP_GRACE: Duration = Duration::from_secs(45);

/// Throttle window for "conditions not met" warnings, per task name.
const CONDITIONS_LOG_WINDOW: Duration = Duration::from_secs(60);

/// Throttle window for "interval is disabled" logs, per task name.
const DISABLED_LOG_WINDOW: Duration = Duration::from_secs(45);

/// How one attempt of [`SingletonIntervalService::run`] concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The bound function completed normally.
    Success,
    /// The bound function returned an error.
    Error,
    /// The bound function exceeded its budget and was aborted.
    Terminated,
    /// A previous attempt still held the mutex; this tick was dropped.
    AlreadyRunning,
    /// One or more gating conditions were unmet.
    ConditionsNotMet,
    /// The service is disabled.
    Disabled,
}

/// Optional behavior attached to a service at construction.
///
/// The callbacks run inline on the attempt's task; keep them cheap.
#[derive(Clone)]
pub struct IntervalOptions {
    /// Named async predicates; the attempt runs only when all are `true`.
    pub conditions: Vec<(String, ConditionFn)>,
    /// Dependency microservices, each synthesized into a condition probing
    /// the context's health check (fail-closed when unset).
    pub microservices: Vec<String>,
    /// Invoked with the error when an attempt fails or is terminated.
    pub on_error: Option<Arc<dyn Fn(&TickError) + Send + Sync>>,
    /// Invoked when an attempt is forcibly terminated.
    pub on_terminate: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Invoked after every attempt that reached execution, after the mutex
    /// has been released.
    pub finally: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Multiple of the interval allowed before forced termination.
    pub termination_factor: u32,
}

impl Default for IntervalOptions {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            microservices: Vec::new(),
            on_error: None,
            on_terminate: None,
            finally: None,
            termination_factor: INTERVAL_TERMINATION_FACTOR,
        }
    }
}

/// A named recurring task with process-wide mutual exclusion.
pub struct SingletonIntervalService {
    ctx: Arc<SchedulerContext>,
    name: Arc<str>,
    interval: Duration,
    task: TaskRef,
    conditions: ConditionSet,
    on_error: Option<Arc<dyn Fn(&TickError) + Send + Sync>>,
    on_terminate: Option<Arc<dyn Fn() + Send + Sync>>,
    finally: Option<Arc<dyn Fn() + Send + Sync>>,
    termination_factor: u32,
    enabled: AtomicBool,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl SingletonIntervalService {
    /// Creates a service bound to `name`.
    ///
    /// First construction wins per name: constructing a second service under
    /// an already-defined name logs a warning and shares the existing
    /// process-wide mutex, it does not error.
    pub fn new(
        ctx: &Arc<SchedulerContext>,
        name: &str,
        interval: Duration,
        task: TaskRef,
        options: IntervalOptions,
    ) -> Arc<Self> {
        if !ctx.mark_defined(name) {
            warn!(task = %name, "interval name already defined, sharing its mutex");
        }
        Arc::new(Self {
            mutex: ctx.mutex_for(name),
            ctx: Arc::clone(ctx),
            name: Arc::from(name),
            interval,
            task,
            conditions: ConditionSet::new(options.conditions, options.microservices),
            on_error: options.on_error,
            on_terminate: options.on_terminate,
            finally: options.finally,
            termination_factor: options.termination_factor,
            enabled: AtomicBool::new(true),
        })
    }

    /// The task name this service is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The nominal recurrence period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Enables or disables future attempts. Disabling does not interrupt an
    /// attempt already in flight.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether attempts are currently allowed to run.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Hands this service to the context's registrar, or queues it until one
    /// is installed.
    pub fn register(self: &Arc<Self>) {
        self.ctx.register_or_queue(self);
    }

    /// Executes one attempt.
    ///
    /// Never panics and never returns `Err`; every failure path is converted
    /// into events and logs. The returned [`RunOutcome`] mirrors the terminal
    /// event of the attempt.
    pub async fn run(self: &Arc<Self>) -> RunOutcome {
        if self.ctx.mark_init(&self.name) {
            self.publish(Event::new(EventKind::Init, Arc::clone(&self.name)));
        }

        if !self.enabled.load(Ordering::Relaxed) {
            let key = format!("disabled:{}", self.name);
            if self.ctx.throttle().allow(&key, DISABLED_LOG_WINDOW) {
                warn!(task = %self.name, "interval is disabled, skipping");
            }
            return RunOutcome::Disabled;
        }

        // A held lock means the previous attempt is still live; this tick is
        // dropped, never queued behind it.
        let guard = match Arc::clone(&self.mutex).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(task = %self.name, "previous attempt still running, dropping tick");
                self.publish(Event::new(EventKind::AlreadyRunning, Arc::clone(&self.name)));
                return RunOutcome::AlreadyRunning;
            }
        };

        if !self.conditions.is_empty() {
            let unmet = self.conditions.evaluate(&self.ctx).await;
            if !unmet.is_empty() {
                self.report_unmet(&unmet);
                drop(guard);
                return RunOutcome::ConditionsNotMet;
            }
        }

        self.publish(Event::new(EventKind::Started, Arc::clone(&self.name)));
        let started = Instant::now();
        let budget = self.interval * self.termination_factor;
        let token = self.ctx.child_token();

        let result = match timeout(budget, self.task.tick(token.clone())).await {
            Ok(result) => result,
            Err(_) => {
                // Abort the in-flight work: cancel its token, drop the future.
                token.cancel();
                Err(TickError::Terminated {
                    task: self.name.to_string(),
                    factor: self.termination_factor,
                    interval: self.interval,
                })
            }
        };
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(()) => {
                self.publish(Event::new(EventKind::Success, Arc::clone(&self.name)));
                RunOutcome::Success
            }
            Err(err @ TickError::Terminated { .. }) => {
                error!(task = %self.name, %err, "attempt terminated");
                if let Some(on_terminate) = &self.on_terminate {
                    on_terminate();
                }
                self.publish(
                    Event::new(EventKind::Terminated, Arc::clone(&self.name))
                        .with_reason(err.to_string()),
                );
                RunOutcome::Terminated
            }
            Err(err) => {
                error!(task = %self.name, %err, "attempt failed");
                self.publish(
                    Event::new(EventKind::Error, Arc::clone(&self.name))
                        .with_reason(err.to_string()),
                );
                RunOutcome::Error
            }
        };

        if let Err(err) = &result {
            if let Some(on_error) = &self.on_error {
                on_error(err);
            }
        }

        // The lock is released and `finally` observes it free before the
        // closing events go out, so a subscriber reacting to Finish can
        // start a fresh attempt immediately.
        drop(guard);
        if let Some(finally) = &self.finally {
            finally();
        }

        if elapsed > self.interval {
            warn!(
                task = %self.name,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = self.interval.as_millis() as u64,
                "attempt outlived its nominal interval"
            );
            self.publish(
                Event::new(EventKind::LongRunning, Arc::clone(&self.name)).with_elapsed(elapsed),
            );
        }
        self.publish(
            Event::new(EventKind::Finish, Arc::clone(&self.name)).with_elapsed(elapsed),
        );
        outcome
    }

    fn report_unmet(&self, unmet: &[Unmet]) {
        let names: Vec<String> = unmet.iter().map(|u| u.name.clone()).collect();
        self.publish(
            Event::new(EventKind::ConditionsNotMet, Arc::clone(&self.name))
                .with_conditions(names.clone()),
        );
        let deps: Vec<String> = unmet
            .iter()
            .filter(|u| u.is_dependency)
            .map(|u| u.name.clone())
            .collect();
        if !deps.is_empty() {
            self.publish(
                Event::new(EventKind::MicroservicesUnresponsive, Arc::clone(&self.name))
                    .with_conditions(deps),
            );
        }

        // Dependencies are expected to still be warming up right after
        // start; a failing user condition is reported even then.
        if self.ctx.uptime() < STARTUP_GRACE && unmet.iter().all(|u| u.is_dependency) {
            debug!(task = %self.name, conditions = ?names, "dependencies not responsive during startup");
            return;
        }
        let key = format!("conditions:{}", self.name);
        if self.ctx.throttle().allow(&key, CONDITIONS_LOG_WINDOW) {
            warn!(task = %self.name, conditions = ?names, "conditions not met, skipping attempt");
        }
    }

    fn publish(&self, event: Event) {
        self.ctx.bus().publish(event);
    }
}
