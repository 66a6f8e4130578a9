//! Error types used by the intervisor runtime.
//!
//! This module defines three error enums:
//!
//! - [`TickError`]: errors raised by one execution attempt of a bound
//!   interval function.
//! - [`QueueError`]: errors raised by a [`JobQueue`](crate::JobQueue)
//!   backend.
//! - [`ProducerError`]: errors raised inside one produce/persist cycle.
//!
//! None of these ever escape [`run()`](crate::SingletonIntervalService::run),
//! [`produce()`](crate::ProducerDriver::produce) or
//! [`persist()`](crate::ProducerDriver::persist) as a panic or a propagated
//! `Err`: a scheduled background task must never crash its host process, so
//! every failure path is converted into logs and emitted events. The types
//! provide `as_label` helpers for logs and metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by one interval execution attempt.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TickError {
    /// The bound function exceeded its time budget and was abandoned.
    ///
    /// The budget is `factor × interval`; the in-flight future is dropped and
    /// its cancellation token is cancelled, so the work is aborted rather
    /// than left running in the background.
    #[error("interval '{task}' was terminated: exceeded {factor}x its nominal interval of {interval:?}")]
    Terminated {
        /// Name of the terminated interval.
        task: String,
        /// The configured termination multiple.
        factor: u32,
        /// The nominal recurrence period.
        interval: Duration,
    },

    /// The bound function returned an error for this attempt.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The bound function observed its cancellation token and exited early.
    #[error("tick cancelled")]
    Canceled,
}

impl TickError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TickError::Terminated { .. } => "tick_terminated",
            TickError::Fail { .. } => "tick_failed",
            TickError::Canceled => "tick_canceled",
        }
    }

    /// Wraps an arbitrary error into a retryable [`TickError::Fail`].
    pub fn fail(error: impl std::fmt::Display) -> Self {
        TickError::Fail {
            error: error.to_string(),
        }
    }
}

/// # Errors produced by a job queue backend.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum QueueError {
    /// The backend could not serve the request.
    #[error("queue backend error: {0}")]
    Backend(String),

    /// A referenced job does not exist in the expected state.
    #[error("job '{id}' not found in state {state}")]
    JobNotFound {
        /// Job id that was looked up.
        id: String,
        /// State the job was expected to be in.
        state: &'static str,
    },
}

/// # Errors produced inside one produce/persist cycle.
///
/// All variants are caught at the cycle boundary and converted into
/// "zero progress this cycle"; the next timer tick retries naturally.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProducerError {
    /// The job queue failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The application's pending-items source failed.
    #[error("pending items fetch failed: {0}")]
    Fetch(String),

    /// An application callback (`mark_items_as_processing`, `on_success`,
    /// `on_fail`) failed.
    #[error("producer callback failed: {0}")]
    Callback(String),
}

impl ProducerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProducerError::Queue(_) => "producer_queue_error",
            ProducerError::Fetch(_) => "producer_fetch_error",
            ProducerError::Callback(_) => "producer_callback_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_message_names_task_and_factor() {
        let err = TickError::Terminated {
            task: "Worker.produce".into(),
            factor: 20,
            interval: Duration::from_millis(10),
        };
        let msg = err.to_string();
        assert!(msg.contains("Worker.produce"));
        assert!(msg.contains("20x"));
        assert_eq!(err.as_label(), "tick_terminated");
    }

    #[test]
    fn test_producer_error_from_queue_error() {
        let err: ProducerError = QueueError::Backend("redis gone".into()).into();
        assert_eq!(err.as_label(), "producer_queue_error");
        assert!(err.to_string().contains("redis gone"));
    }
}
