//! # Scheduler registrar.
//!
//! The [`Registrar`] trait is the seam between interval services and whatever
//! actually fires them on a cadence. [`TokioRegistrar`] is the in-crate
//! implementation: one `tokio::time::interval` loop per registered name, each
//! tick spawning one `run()` attempt so a slow attempt never stalls the timer
//! (that is exactly how `AlreadyRunning` arises).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::interval::service::SingletonIntervalService;

/// Hands registered interval services to a scheduler.
pub trait Registrar: Send + Sync + 'static {
    /// Starts firing `service` on its nominal interval.
    fn add_interval(&self, service: Arc<SingletonIntervalService>);

    /// Names of all currently registered intervals.
    fn intervals(&self) -> Vec<String>;
}

/// Timer-driven [`Registrar`] backed by the tokio runtime.
pub struct TokioRegistrar {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    token: CancellationToken,
}

impl TokioRegistrar {
    /// Creates a registrar with no intervals.
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
        }
    }

    /// Stops every timer loop. Attempts already in flight are not interrupted.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Default for TokioRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokioRegistrar {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl Registrar for TokioRegistrar {
    fn add_interval(&self, service: Arc<SingletonIntervalService>) {
        let name = service.name().to_string();
        let token = self.token.child_token();
        info!(task = %name, interval = ?service.interval(), "registering interval");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately; the
            // cadence starts one period after registration.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            service.run().await;
                        });
                    }
                }
            }
        });
        self.handles.lock().unwrap().insert(name, handle);
    }

    fn intervals(&self) -> Vec<String> {
        self.handles.lock().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::context::SchedulerContext;
    use crate::interval::service::IntervalOptions;
    use crate::interval::task::TickFn;

    #[tokio::test]
    async fn test_timer_fires_attempts() {
        let ctx = SchedulerContext::new();
        let registrar = Arc::new(TokioRegistrar::new());
        ctx.set_registrar(registrar.clone());

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = Arc::clone(&ticks);
        let svc = SingletonIntervalService::new(
            &ctx,
            "Timer.tick",
            Duration::from_millis(20),
            TickFn::arc(move |_| {
                let ticks = Arc::clone(&ticks_clone);
                async move {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            }),
            IntervalOptions::default(),
        );
        svc.register();

        tokio::time::sleep(Duration::from_millis(120)).await;
        registrar.shutdown();
        assert!(ticks.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_firing() {
        let ctx = SchedulerContext::new();
        let registrar = Arc::new(TokioRegistrar::new());
        ctx.set_registrar(registrar.clone());

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = Arc::clone(&ticks);
        let svc = SingletonIntervalService::new(
            &ctx,
            "Stop.tick",
            Duration::from_millis(10),
            TickFn::arc(move |_| {
                let ticks = Arc::clone(&ticks_clone);
                async move {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            }),
            IntervalOptions::default(),
        );
        svc.register();

        tokio::time::sleep(Duration::from_millis(50)).await;
        registrar.shutdown();
        let after_shutdown = ticks.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // One spawn may already be in flight when the token flips.
        assert!(ticks.load(Ordering::Relaxed) <= after_shutdown + 1);
    }

    #[tokio::test]
    async fn test_intervals_lists_registered_names() {
        let registrar = TokioRegistrar::new();
        let ctx = SchedulerContext::new();
        let svc = SingletonIntervalService::new(
            &ctx,
            "Listed.tick",
            Duration::from_secs(60),
            TickFn::arc(|_| async { Ok(()) }),
            IntervalOptions::default(),
        );
        registrar.add_interval(svc);
        assert_eq!(registrar.intervals(), vec!["Listed.tick".to_string()]);
    }
}
