//! Singleton-interval execution: tasks, gating conditions, the service state
//! machine, and the registrar that fires attempts on a timer.

mod conditions;
mod registrar;
mod service;
mod task;

pub use conditions::{ConditionFn, CONDITION_TIMEOUT};
pub use registrar::{Registrar, TokioRegistrar};
pub use service::{
    IntervalOptions, RunOutcome, SingletonIntervalService, INTERVAL_TERMINATION_FACTOR,
};
pub use task::{IntervalTask, TaskRef, TickFn};
