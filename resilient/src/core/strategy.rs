//! The strategy abstraction.
//!
//! A strategy receives a nullary, type-erased operation and an optional
//! cancellation signal, and decides when and whether to run it. Results are
//! carried as a boxed [`Payload`] so strategies stay object safe and can be
//! chained dynamically; [`StrategyExt::run`] restores the concrete type.

use crate::cancellation::CancellationToken;
use crate::errors::{ResilientError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Type-erased successful result of an operation.
pub type Payload = Box<dyn Any + Send>;

/// A type-erased, repeatable operation.
///
/// Every call produces a fresh attempt.
pub type Protected = Arc<dyn Fn() -> BoxFuture<'static, Result<Payload>> + Send + Sync>;

/// A resilience strategy wrapping the execution of an operation.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Executes `operation`, possibly delaying, rejecting or retrying it.
    ///
    /// Implementations must never invoke the operation after observing a
    /// set `signal`.
    async fn execute(
        &self,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload>;
}

#[async_trait]
impl<S: Strategy + ?Sized> Strategy for Arc<S> {
    async fn execute(
        &self,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload> {
        (**self).execute(operation, signal).await
    }
}

/// Typed convenience methods available on every strategy.
#[async_trait]
pub trait StrategyExt: Strategy {
    /// Runs a typed operation through the strategy.
    async fn run<T, F, Fut>(&self, operation: F, signal: Option<CancellationToken>) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let payload = self.execute(protect(operation), signal).await?;
        downcast(payload)
    }
}

impl<S: Strategy + ?Sized> StrategyExt for S {}

/// Erases the result type of an operation.
///
/// Operation failures are normalized with [`ResilientError::operation`]; a
/// panicking attempt fails like any other attempt.
pub fn protect<T, F, Fut>(operation: F) -> Protected
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || {
        let attempt = match std::panic::catch_unwind(AssertUnwindSafe(&operation)) {
            Ok(attempt) => attempt,
            Err(panic) => {
                return futures::future::ready(Err(ResilientError::panicked(panic.as_ref()))).boxed();
            }
        };
        async move {
            match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(result) => result
                    .map(|value| Box::new(value) as Payload)
                    .map_err(ResilientError::operation),
                Err(panic) => Err(ResilientError::panicked(panic.as_ref())),
            }
        }
        .boxed()
    })
}

/// Restores the concrete type of a payload.
pub fn downcast<T: 'static>(payload: Payload) -> Result<T> {
    payload.downcast::<T>().map(|value| *value).map_err(|_| {
        ResilientError::Internal(format!(
            "unexpected payload type, expected {}",
            std::any::type_name::<T>()
        ))
    })
}
