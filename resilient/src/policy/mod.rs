//! Observable, cancellable execution of operations through a strategy chain.

mod request;
mod tracer;

pub(crate) use request::{settled, ResponseReceiver};
pub use request::PolicyRequest;
pub use tracer::ExecutionTracer;

use crate::cancellation::CancellationToken;
use crate::core::{downcast, protect, ExecutionEvent, ExecutionType, Strategy};
use crate::events::{Emitter, EventSink, EventStream, EventSubscription, NoOpEventSink};
use crate::strategies::ComposedStrategy;
use crate::utils::generate_id;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Runs operations through a strategy chain, reporting each execution as an
/// event stream.
///
/// Every call to [`execute`](Self::execute) gets its own id and event
/// stream; [`events`](Self::events) mirrors the events of all executions.
#[derive(Clone)]
pub struct Policy {
    strategy: Arc<ComposedStrategy>,
    events: EventStream,
    sink: Arc<dyn EventSink>,
}

impl Policy {
    /// Creates a policy from strategies, first = outermost.
    #[must_use]
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self::from_strategy(ComposedStrategy::new(strategies))
    }

    /// Creates a policy from an already composed chain.
    #[must_use]
    pub fn from_strategy(strategy: ComposedStrategy) -> Self {
        Self {
            strategy: Arc::new(strategy),
            events: EventStream::new(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets a sink observing every event.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Subscribes to the events of all executions started after this call.
    #[must_use]
    pub fn events(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Returns the composed strategy chain.
    #[must_use]
    pub fn strategy(&self) -> &ComposedStrategy {
        &self.strategy
    }

    /// Starts executing `operation` through the chain.
    ///
    /// Cancelling `signal` emits a `cancel` event (once, while the execution
    /// is live) and propagates through every strategy. A signal that is
    /// already set only produces the `error`. Must be called from within a
    /// Tokio runtime.
    pub fn execute<T, F, Fut>(&self, operation: F, signal: Option<CancellationToken>) -> PolicyRequest<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let id = generate_id();
        let stream = EventStream::replaying();
        let emitter = Emitter::new(stream.clone(), self.events.clone(), Arc::clone(&self.sink));
        let (tx, rx) = watch::channel(None);

        let listener = signal.as_ref().filter(|token| !token.is_cancelled()).map(|token| {
            let emitter = emitter.clone();
            let id = id.clone();
            token.on_cancel(move || {
                emitter.emit(ExecutionEvent::execution(id, ExecutionType::Cancel));
            })
        });

        debug!(id = %id, "Executing through policy");
        let tracer = ExecutionTracer::new(id.clone(), emitter.clone());
        let strategy = Arc::clone(&self.strategy);
        tokio::spawn(async move {
            let result = tracer
                .trace(strategy.as_ref(), protect(operation), signal)
                .await
                .and_then(downcast::<T>);

            emitter.close();
            drop(listener);
            let _ = tx.send(Some(result));
        });

        PolicyRequest {
            id,
            events: stream,
            response: rx,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("strategy", &self.strategy)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Reason;
    use crate::events::CollectingEventSink;
    use crate::strategies::{BulkheadOptions, BulkheadStrategy, RetryOptions, RetryStrategy};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn names(events: &[ExecutionEvent]) -> Vec<&'static str> {
        events.iter().map(ExecutionEvent::type_name).collect()
    }

    #[tokio::test]
    async fn test_execute_success() {
        let policy = Policy::default();
        let request = policy.execute(|| async { anyhow::Ok("value".to_string()) }, None);

        assert_eq!(request.response().await.unwrap(), "value");
        assert!(request.is_settled());
        assert_eq!(names(&request.events().collect_all().await), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn test_retry_limit_events() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let policy = Policy::new(vec![Arc::new(RetryStrategy::new(RetryOptions::new(10, 0)))]);

        let request = policy.execute(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("always")) }
            },
            None,
        );

        let err = request.response().await.unwrap_err();
        assert_eq!(err.to_string(), "always");
        assert_eq!(calls.load(Ordering::SeqCst), 11);

        let mut expected = vec!["start"];
        expected.extend(std::iter::repeat("warn").take(10));
        expected.extend(["error", "stop"]);
        assert_eq!(names(&request.events().collect_all().await), expected);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let policy = Policy::default();
        let token = CancellationToken::new();
        token.cancel();

        let request = policy.execute(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { anyhow::Ok(()) }
            },
            Some(token),
        );

        let err = request.response().await.unwrap_err();
        assert!(err.is_reason(Reason::Cancel));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(names(&request.events().collect_all().await), vec!["error"]);
    }

    #[tokio::test]
    async fn test_panicking_operation_settles_and_closes() {
        let policy = Policy::default();

        let request = policy.execute(
            || async {
                if true {
                    panic!("boom");
                }
                anyhow::Ok(1)
            },
            None,
        );

        let err = request.response().await.unwrap_err();
        assert_eq!(err.to_string(), "panicked: boom");
        assert_eq!(
            names(&request.events().collect_all().await),
            vec!["start", "error", "stop"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_execution() {
        let policy = Policy::default();
        let token = CancellationToken::new();

        let request = policy.execute(
            || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                anyhow::Ok(1_u8)
            },
            Some(token.clone()),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        token.cancel();

        assert_eq!(request.response().await.unwrap(), 1);
        assert_eq!(
            names(&request.events().collect_all().await),
            vec!["start", "cancel", "stop"]
        );
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_ignored() {
        let policy = Policy::default();
        let token = CancellationToken::new();

        let request = policy.execute(|| async { anyhow::Ok(()) }, Some(token.clone()));
        request.response().await.unwrap();
        token.cancel();

        assert_eq!(names(&request.events().collect_all().await), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn test_instance_stream_and_sink_mirror_requests() {
        let sink = Arc::new(CollectingEventSink::new());
        let policy = Policy::default().with_sink(sink.clone());
        let instance = policy.events();

        let first = policy.execute(|| async { anyhow::Ok(()) }, None);
        let second = policy.execute(|| async { anyhow::Ok(()) }, None);
        first.response().await.unwrap();
        second.response().await.unwrap();
        drop(policy);

        assert_ne!(first.id(), second.id());
        assert_eq!(sink.len(), 4);

        let mut instance = instance;
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(instance.recv().await.unwrap().id.unwrap());
        }
        assert_eq!(ids.iter().filter(|id| *id == first.id()).count(), 2);
        assert_eq!(ids.iter().filter(|id| *id == second.id()).count(), 2);
    }

    #[tokio::test]
    async fn test_bulkhead_rejection_surfaces_as_error() {
        let policy = Policy::new(vec![Arc::new(BulkheadStrategy::new(BulkheadOptions::new(0, 0)))]);
        let request = policy.execute(|| async { anyhow::Ok(()) }, None);

        let err = request.response().await.unwrap_err();
        assert!(err.is_reason(Reason::Bulkhead));
        assert_eq!(names(&request.events().collect_all().await), vec!["error"]);
    }
}
