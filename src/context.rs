//! # SchedulerContext: explicit home for process-wide scheduler state.
//!
//! Everything that must be shared across all intervals in a process lives
//! here, constructed once and passed by `Arc` to every
//! [`SingletonIntervalService`](crate::SingletonIntervalService):
//!
//! - the **mutex registry** (task name → lock, lazily created, never
//!   destroyed) that backs the at-most-once-concurrently guarantee;
//! - the **init-emitted** and **defined-names** sets (Init fires once per
//!   name; re-constructing a name warns and reuses the first definition's
//!   mutex);
//! - the **log throttle** shared by every throttled log line;
//! - the **registrar slot** plus the pending-registration queue: services
//!   registered before a registrar exists are queued and flushed exactly once
//!   when [`SchedulerContext::set_registrar`] is called;
//! - the **health check** used by synthesized dependency conditions
//!   (fail-closed: no configured check means every dependency is down);
//! - the lifecycle event [`Bus`] and the **availability bus** carrying
//!   [`HealthEvent`]s that drive the producer pause protocol.
//!
//! Tests construct a fresh context instead of resetting global state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::Bus;
use crate::interval::{Registrar, SingletonIntervalService};
use crate::throttle::LogThrottle;

/// Capacity of the availability (health) broadcast channel.
const HEALTH_BUS_CAPACITY: usize = 64;

/// Probe answering whether a named dependency microservice is responsive.
///
/// Configured once process-wide via [`SchedulerContext::set_health_check`].
/// When absent, every synthesized dependency condition fails (never
/// fail-open).
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    /// Returns `true` if the named microservice currently responds.
    async fn is_responsive(&self, microservice: &str) -> bool;
}

/// Availability transition for one dependency microservice.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    /// Name of the dependency.
    pub microservice: String,
    /// `true` when the dependency became available, `false` when it was lost.
    pub available: bool,
}

/// Process-wide scheduler state, shared by reference.
pub struct SchedulerContext {
    bus: Bus,
    health_tx: broadcast::Sender<HealthEvent>,
    mutexes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    init_emitted: Mutex<HashSet<String>>,
    defined: Mutex<HashSet<String>>,
    throttle: LogThrottle,
    registrar: RwLock<Option<Arc<dyn Registrar>>>,
    pending: Mutex<Vec<Arc<SingletonIntervalService>>>,
    health_check: RwLock<Option<Arc<dyn HealthCheck>>>,
    token: CancellationToken,
    started_at: Instant,
}

impl SchedulerContext {
    /// Creates a fresh context with an empty mutex registry and no registrar.
    pub fn new() -> Arc<Self> {
        let (health_tx, _rx) = broadcast::channel(HEALTH_BUS_CAPACITY);
        Arc::new(Self {
            bus: Bus::default(),
            health_tx,
            mutexes: Mutex::new(HashMap::new()),
            init_emitted: Mutex::new(HashSet::new()),
            defined: Mutex::new(HashSet::new()),
            throttle: LogThrottle::new(),
            registrar: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
            health_check: RwLock::new(None),
            token: CancellationToken::new(),
            started_at: Instant::now(),
        })
    }

    /// The lifecycle event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Shared log throttle.
    pub fn throttle(&self) -> &LogThrottle {
        &self.throttle
    }

    /// How long this context (and effectively the process) has been up.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Derives a child cancellation token for one execution attempt.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Cancels every token derived from this context.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Returns the lock for `name`, creating it on first use.
    ///
    /// The registry never shrinks: one mutex per task name, process-wide.
    pub(crate) fn mutex_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut mutexes = self.mutexes.lock().unwrap();
        Arc::clone(
            mutexes
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Records that `Init` was emitted for `name`; `true` only the first time.
    pub(crate) fn mark_init(&self, name: &str) -> bool {
        self.init_emitted.lock().unwrap().insert(name.to_string())
    }

    /// Records a task definition; `true` only for the first definition.
    pub(crate) fn mark_defined(&self, name: &str) -> bool {
        self.defined.lock().unwrap().insert(name.to_string())
    }

    // ---- Registrar lifecycle ----

    /// Installs the scheduler registrar and flushes any pending
    /// registrations, exactly once per queued service.
    pub fn set_registrar(&self, registrar: Arc<dyn Registrar>) {
        {
            let mut slot = self.registrar.write().unwrap();
            *slot = Some(registrar);
        }
        let pending: Vec<Arc<SingletonIntervalService>> =
            self.pending.lock().unwrap().drain(..).collect();
        for svc in pending {
            self.register_service(&svc);
        }
    }

    /// Registers `svc` now if a registrar exists, otherwise queues it for the
    /// flush in [`SchedulerContext::set_registrar`]. Queuing deduplicates by
    /// task name.
    pub(crate) fn register_or_queue(&self, svc: &Arc<SingletonIntervalService>) {
        let has_registrar = self.registrar.read().unwrap().is_some();
        if has_registrar {
            self.register_service(svc);
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.iter().any(|p| p.name() == svc.name()) {
            warn!(task = %svc.name(), "interval already queued for registration, skipping");
            return;
        }
        pending.push(Arc::clone(svc));
    }

    fn register_service(&self, svc: &Arc<SingletonIntervalService>) {
        let registrar = {
            let slot = self.registrar.read().unwrap();
            match slot.as_ref() {
                Some(r) => Arc::clone(r),
                None => return,
            }
        };
        if registrar.intervals().iter().any(|n| n == svc.name()) {
            warn!(task = %svc.name(), "interval already registered with scheduler, skipping");
            return;
        }
        registrar.add_interval(Arc::clone(svc));
    }

    // ---- Health / availability ----

    /// Installs the process-wide microservice health check.
    pub fn set_health_check(&self, check: Arc<dyn HealthCheck>) {
        *self.health_check.write().unwrap() = Some(check);
    }

    /// The configured health check, if any.
    pub(crate) fn health_check(&self) -> Option<Arc<dyn HealthCheck>> {
        self.health_check.read().unwrap().clone()
    }

    /// Publishes an availability transition on the availability bus.
    pub fn publish_health(&self, event: HealthEvent) {
        let _ = self.health_tx.send(event);
    }

    /// Subscribes to availability transitions.
    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.health_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{IntervalOptions, TickFn};

    struct FakeRegistrar {
        added: Mutex<Vec<String>>,
    }

    impl FakeRegistrar {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                added: Mutex::new(Vec::new()),
            })
        }
    }

    impl Registrar for FakeRegistrar {
        fn add_interval(&self, service: Arc<SingletonIntervalService>) {
            self.added.lock().unwrap().push(service.name().to_string());
        }

        fn intervals(&self) -> Vec<String> {
            self.added.lock().unwrap().clone()
        }
    }

    fn noop_service(ctx: &Arc<SchedulerContext>, name: &str) -> Arc<SingletonIntervalService> {
        SingletonIntervalService::new(
            ctx,
            name,
            Duration::from_secs(1),
            TickFn::arc(|_| async { Ok(()) }),
            IntervalOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_mutex_registry_reuses_lock_per_name() {
        let ctx = SchedulerContext::new();
        let a = ctx.mutex_for("x");
        let b = ctx.mutex_for("x");
        let c = ctx.mutex_for("y");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_pending_registrations_flush_once() {
        let ctx = SchedulerContext::new();
        let svc = noop_service(&ctx, "Pending.tick");
        svc.register();
        svc.register(); // queued duplicate is dropped

        let registrar = FakeRegistrar::new();
        ctx.set_registrar(registrar.clone());
        assert_eq!(registrar.intervals(), vec!["Pending.tick".to_string()]);

        // A later registration under the same name is skipped, not doubled.
        svc.register();
        assert_eq!(registrar.intervals().len(), 1);
    }

    #[tokio::test]
    async fn test_register_with_registrar_already_set() {
        let ctx = SchedulerContext::new();
        let registrar = FakeRegistrar::new();
        ctx.set_registrar(registrar.clone());

        let svc = noop_service(&ctx, "Eager.tick");
        svc.register();
        assert_eq!(registrar.intervals(), vec!["Eager.tick".to_string()]);
    }

    #[tokio::test]
    async fn test_init_marked_once() {
        let ctx = SchedulerContext::new();
        assert!(ctx.mark_init("t"));
        assert!(!ctx.mark_init("t"));
    }
}
