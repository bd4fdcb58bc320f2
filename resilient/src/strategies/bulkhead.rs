//! Bulkhead strategy: bounded concurrency with a bounded wait queue.

use crate::cancellation::{throw_if_cancelled, until_cancelled, CancellationToken};
use crate::core::{Payload, Protected, Strategy};
use crate::errors::{ResilientError, Result};
use crate::utils::bound;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Options for [`BulkheadStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadOptions {
    /// Number of concurrent calls allowed. Negative means unbounded.
    pub concurrency: i64,
    /// Number of calls allowed to wait for a slot. Negative means unbounded.
    pub queue: i64,
}

impl Default for BulkheadOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue: 0,
        }
    }
}

impl BulkheadOptions {
    /// Creates options with the given concurrency and queue size.
    #[must_use]
    pub const fn new(concurrency: i64, queue: i64) -> Self {
        Self { concurrency, queue }
    }

    /// Sets the concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: i64) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the queue size.
    #[must_use]
    pub const fn with_queue(mut self, queue: i64) -> Self {
        self.queue = queue;
        self
    }
}

/// Limits the number of concurrent calls, queueing a bounded number of
/// extra calls until a running one settles.
///
/// Calls rejected for lack of room fail with a bulkhead error without
/// running. Cancelling a queued call rejects it with a cancel error;
/// cancelling after admission does not abort the running operation.
pub struct BulkheadStrategy {
    concurrency: Option<u64>,
    queue: Option<u64>,
    /// Running slots; `None` when concurrency is unbounded.
    permits: Option<Semaphore>,
    queued: Mutex<u64>,
}

enum Admission<'a> {
    Running(SemaphorePermit<'a>),
    Queued(QueueTicket<'a>),
}

/// Holds a place in the wait queue until dropped.
struct QueueTicket<'a> {
    queued: &'a Mutex<u64>,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        *self.queued.lock() -= 1;
    }
}

impl BulkheadStrategy {
    /// Creates a new bulkhead strategy.
    #[must_use]
    pub fn new(options: BulkheadOptions) -> Self {
        let concurrency = bound(options.concurrency);
        let permits = concurrency.map(|c| {
            Semaphore::new(usize::try_from(c).unwrap_or(usize::MAX).min(Semaphore::MAX_PERMITS))
        });

        Self {
            concurrency,
            queue: bound(options.queue),
            permits,
            queued: Mutex::new(0),
        }
    }

    /// Returns the number of calls currently waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> u64 {
        *self.queued.lock()
    }

    /// Takes a free slot, or a place in the queue, or rejects.
    fn admit<'a>(&'a self, permits: &'a Semaphore) -> Result<Admission<'a>> {
        let mut queued = self.queued.lock();
        if self.concurrency == Some(0) {
            debug!("Bulkhead without slots rejected call");
            return Err(ResilientError::bulkhead());
        }

        if let Ok(permit) = permits.try_acquire() {
            return Ok(Admission::Running(permit));
        }

        if self.queue.is_some_and(|q| *queued >= q) {
            debug!(queued = *queued, "Bulkhead rejected call");
            return Err(ResilientError::bulkhead());
        }

        *queued += 1;
        Ok(Admission::Queued(QueueTicket {
            queued: &self.queued,
        }))
    }
}

impl Default for BulkheadStrategy {
    fn default() -> Self {
        Self::new(BulkheadOptions::default())
    }
}

impl std::fmt::Debug for BulkheadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadStrategy")
            .field("concurrency", &self.concurrency)
            .field("queue", &self.queue)
            .field("free", &self.permits.as_ref().map(Semaphore::available_permits))
            .field("queued", &self.queued())
            .finish()
    }
}

#[async_trait]
impl Strategy for BulkheadStrategy {
    async fn execute(
        &self,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload> {
        throw_if_cancelled(signal.as_ref())?;

        let Some(permits) = self.permits.as_ref() else {
            return operation().await;
        };

        let _permit = match self.admit(permits)? {
            Admission::Running(permit) => permit,
            Admission::Queued(ticket) => {
                let acquired = tokio::select! {
                    biased;
                    () = until_cancelled(signal.as_ref()) => None,
                    permit = permits.acquire() => Some(permit),
                };
                drop(ticket);

                match acquired {
                    Some(Ok(permit)) => permit,
                    Some(Err(_)) => {
                        return Err(ResilientError::Internal("bulkhead slots closed".to_string()));
                    }
                    None => {
                        debug!("Queued call cancelled");
                        return Err(ResilientError::cancel());
                    }
                }
            }
        };

        operation().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StrategyExt;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use crate::errors::Reason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn sleeper(calls: Arc<AtomicUsize>, ms: u64) -> impl Fn() -> BoxFuture<'static, anyhow::Result<()>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                anyhow::Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejects() {
        let strategy = BulkheadStrategy::new(BulkheadOptions::new(0, -1));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = strategy.run(sleeper(calls.clone(), 0), None).await.unwrap_err();

        assert!(err.is_reason(Reason::Bulkhead));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_beyond_concurrency_and_queue() {
        let strategy = Arc::new(BulkheadStrategy::new(BulkheadOptions::new(2, 1)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let strategy = strategy.clone();
            let op = sleeper(calls.clone(), 100);
            handles.push(tokio::spawn(async move { strategy.run(op, None).await }));
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(strategy.queued(), 1);

        let err = strategy.run(sleeper(calls.clone(), 0), None).await.unwrap_err();
        assert!(err.is_reason(Reason::Bulkhead));

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(strategy.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_call_runs_after_slot_frees() {
        let strategy = Arc::new(BulkheadStrategy::new(BulkheadOptions::new(1, 1)));
        let calls = Arc::new(AtomicUsize::new(0));
        let started = tokio::time::Instant::now();

        let first = {
            let strategy = strategy.clone();
            let op = sleeper(calls.clone(), 100);
            tokio::spawn(async move { strategy.run(op, None).await })
        };
        tokio::task::yield_now().await;

        strategy.run(sleeper(calls.clone(), 100), None).await.unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_queued() {
        let strategy = Arc::new(BulkheadStrategy::new(BulkheadOptions::new(1, 1)));
        let calls = Arc::new(AtomicUsize::new(0));

        let running = {
            let strategy = strategy.clone();
            let op = sleeper(calls.clone(), 1_000);
            tokio::spawn(async move { strategy.run(op, None).await })
        };
        tokio::task::yield_now().await;

        let token = CancellationToken::new();
        let queued = {
            let strategy = strategy.clone();
            let op = sleeper(calls.clone(), 0);
            let token = token.clone();
            tokio::spawn(async move { strategy.run(op, Some(token)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(strategy.queued(), 1);

        token.cancel();
        let err = queued.await.unwrap().unwrap_err();

        assert!(err.is_reason(Reason::Cancel));
        assert_eq!(strategy.queued(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unbounded_concurrency() {
        let strategy = Arc::new(BulkheadStrategy::new(BulkheadOptions::new(-1, 0)));
        let calls = Arc::new(AtomicUsize::new(0));

        let runs = (0..20).map(|_| strategy.run(sleeper(calls.clone(), 5), None));
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(calls.load(Ordering::SeqCst), 20);
    }

    fn spawn_tracked(
        strategy: &Arc<BulkheadStrategy>,
        active: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
        signal: Option<CancellationToken>,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let strategy = strategy.clone();
        let (active, peak) = (active.clone(), peak.clone());
        let op = move || {
            let (active, peak) = (active.clone(), peak.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        };
        tokio::spawn(async move { strategy.run(op, signal).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_queued_call_keeps_limit() {
        let strategy = Arc::new(BulkheadStrategy::new(BulkheadOptions::new(1, -1)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let first = spawn_tracked(&strategy, &active, &peak, None);
        tokio::task::yield_now().await;

        let token = CancellationToken::new();
        let cancelled = spawn_tracked(&strategy, &active, &peak, Some(token.clone()));
        let behind = spawn_tracked(&strategy, &active, &peak, None);
        tokio::task::yield_now().await;
        assert_eq!(strategy.queued(), 2);

        token.cancel();
        assert!(cancelled.await.unwrap().unwrap_err().is_reason(Reason::Cancel));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let late = spawn_tracked(&strategy, &active, &peak, None);

        first.await.unwrap().unwrap();
        behind.await.unwrap().unwrap();
        late.await.unwrap().unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(strategy.queued(), 0);
    }
}
