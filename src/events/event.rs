//! # Lifecycle events emitted by interval services.
//!
//! [`EventKind`] classifies the fixed lifecycle of one execution attempt.
//! [`Event`] carries the task name plus optional metadata (reason, failed
//! condition names, elapsed duration).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Within one attempt events are published in the fixed order
//! `Init(once)` → {`AlreadyRunning` | `ConditionsNotMet`
//! [+`MicroservicesUnresponsive`] | `Started` → (`Success` | `Terminated` |
//! `Error`) → [`LongRunning`] → `Finish`}. No ordering holds across task
//! names.
//!
//! ## Example
//! ```rust
//! use intervisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::Terminated, "Worker.produce")
//!     .with_reason("exceeded 20x its nominal interval");
//!
//! assert_eq!(ev.kind, EventKind::Terminated);
//! assert_eq!(ev.name(), "Worker.produce.Terminated");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of interval lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First observation of a task name; emitted exactly once per name.
    Init,
    /// The attempt passed all gates and the bound function is running.
    Started,
    /// The mutex was held by a previous attempt; this tick was dropped.
    AlreadyRunning,
    /// One or more gating conditions were unmet; the attempt was skipped.
    ///
    /// Sets `conditions`: the unmet condition names.
    ConditionsNotMet,
    /// At least one unmet condition was a dependency microservice.
    ///
    /// Emitted in addition to [`EventKind::ConditionsNotMet`].
    /// Sets `conditions`: the unresponsive dependency names.
    MicroservicesUnresponsive,
    /// The bound function exceeded its time budget and was abandoned.
    ///
    /// Sets `reason`: a message naming the task and the configured multiple.
    Terminated,
    /// The bound function returned an error.
    ///
    /// Sets `reason`: the error message.
    Error,
    /// The bound function completed normally.
    Success,
    /// Wall time of the attempt exceeded the nominal interval.
    ///
    /// Sets `elapsed`: the attempt's wall time.
    LongRunning,
    /// The attempt finished (after any of Success/Terminated/Error).
    ///
    /// Sets `elapsed`: the attempt's wall time.
    Finish,
}

impl EventKind {
    /// Stable string form used in namespaced event names.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Init => "Init",
            EventKind::Started => "Started",
            EventKind::AlreadyRunning => "AlreadyRunning",
            EventKind::ConditionsNotMet => "ConditionsNotMet",
            EventKind::MicroservicesUnresponsive => "MicroservicesUnresponsive",
            EventKind::Terminated => "Terminated",
            EventKind::Error => "Error",
            EventKind::Success => "Success",
            EventKind::LongRunning => "LongRunning",
            EventKind::Finish => "Finish",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the interval that produced the event.
    pub task: Arc<str>,
    /// Human-readable reason (termination/error details).
    pub reason: Option<Arc<str>>,
    /// Unmet condition names (ConditionsNotMet / MicroservicesUnresponsive).
    pub conditions: Option<Arc<[String]>>,
    /// Wall time of the attempt (LongRunning / Finish).
    pub elapsed: Option<Duration>,
}

impl Event {
    /// Creates a new event of the given kind for the given task, with the
    /// current timestamp and next sequence number.
    pub fn new(kind: EventKind, task: impl Into<Arc<str>>) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: task.into(),
            reason: None,
            conditions: None,
            elapsed: None,
        }
    }

    /// The namespaced event name, `"<taskName>.<EventKind>"`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.task, self.kind)
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the list of unmet condition names.
    #[inline]
    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = Some(conditions.into());
        self
    }

    /// Attaches the attempt's wall time.
    #[inline]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_namespaced() {
        let ev = Event::new(EventKind::Started, "Worker.produce");
        assert_eq!(ev.name(), "Worker.produce.Started");
    }

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::Init, "t");
        let b = Event::new(EventKind::Finish, "t");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_builder_metadata() {
        let ev = Event::new(EventKind::ConditionsNotMet, "t")
            .with_conditions(vec!["db".into(), "world".into()])
            .with_reason("gate failed");
        assert_eq!(ev.conditions.as_deref(), Some(&["db".to_string(), "world".to_string()][..]));
        assert_eq!(ev.reason.as_deref(), Some("gate failed"));
    }
}
