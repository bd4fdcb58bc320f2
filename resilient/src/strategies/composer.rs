//! Composition of strategy chains.

use crate::cancellation::{throw_if_cancelled, CancellationToken};
use crate::core::{Payload, Protected, Strategy};
use crate::errors::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;

/// An ordered chain of strategies acting as one.
///
/// The first strategy is the outermost: with `[a, b, c]` an operation runs
/// as `a(b(c(operation)))`, so each strategy only observes failures that
/// escape the strategies nested inside it.
#[derive(Clone, Default)]
pub struct ComposedStrategy {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl ComposedStrategy {
    /// Creates a chain from outermost to innermost.
    #[must_use]
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Appends a strategy as the new innermost element.
    #[must_use]
    pub fn with(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Returns the number of strategies in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl std::fmt::Debug for ComposedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedStrategy")
            .field("len", &self.strategies.len())
            .finish()
    }
}

#[async_trait]
impl Strategy for ComposedStrategy {
    async fn execute(
        &self,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload> {
        throw_if_cancelled(signal.as_ref())?;

        let chained = self
            .strategies
            .iter()
            .rev()
            .fold(operation, |inner, strategy| {
                let strategy = Arc::clone(strategy);
                let signal = signal.clone();
                Arc::new(move || {
                    let strategy = Arc::clone(&strategy);
                    let inner = Arc::clone(&inner);
                    let signal = signal.clone();
                    async move { strategy.execute(inner, signal).await }.boxed()
                }) as Protected
            });

        chained().await
    }
}

/// Composes strategies, first = outermost, into a single strategy.
#[must_use]
pub fn compose(strategies: impl IntoIterator<Item = Arc<dyn Strategy>>) -> ComposedStrategy {
    ComposedStrategy::new(strategies.into_iter().collect())
}
