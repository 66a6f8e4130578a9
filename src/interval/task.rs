//! # Bound interval function abstraction.
//!
//! [`IntervalTask`] is the async, cancelable unit a
//! [`SingletonIntervalService`](crate::SingletonIntervalService) executes on
//! each attempt. The name lives on the service, not on the task; the same
//! task value can back several named intervals.
//!
//! A task receives a [`CancellationToken`] derived for this one attempt. On
//! forced termination the token is cancelled and the future is dropped, so
//! implementations should check the token at await points to stop promptly.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TickError;

/// Shared handle to a bound interval function.
pub type TaskRef = Arc<dyn IntervalTask>;

/// # Asynchronous, cancelable unit of recurring work.
///
/// ## Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use intervisor::{IntervalTask, TickError};
///
/// struct Demo;
///
/// #[async_trait]
/// impl IntervalTask for Demo {
///     async fn tick(&self, token: CancellationToken) -> Result<(), TickError> {
///         if token.is_cancelled() {
///             return Err(TickError::Canceled);
///         }
///         // do one unit of work...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait IntervalTask: Send + Sync + 'static {
    /// Executes one attempt until completion or cancellation.
    async fn tick(&self, token: CancellationToken) -> Result<(), TickError>;
}

/// Function-backed [`IntervalTask`].
///
/// Wraps a closure that *creates* a new future per attempt, so there is no
/// hidden state shared between attempts; shared state goes through an
/// explicit `Arc` captured by the closure.
pub struct TickFn<F> {
    f: F,
}

impl<F> TickFn<F> {
    /// Creates a new function-backed task.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> TickFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<(), TickError>> + Send + 'static,
{
    /// Creates the task and returns it as a shared [`TaskRef`].
    ///
    /// ## Example
    /// ```
    /// use tokio_util::sync::CancellationToken;
    /// use intervisor::{TaskRef, TickFn};
    ///
    /// let t: TaskRef = TickFn::arc(|_token: CancellationToken| async {
    ///     Ok(())
    /// });
    /// ```
    pub fn arc(f: F) -> TaskRef {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> IntervalTask for TickFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TickError>> + Send + 'static,
{
    async fn tick(&self, token: CancellationToken) -> Result<(), TickError> {
        (self.f)(token).await
    }
}
