//! Execution tracing: turns a strategy call into a normalized event sequence.

use crate::cancellation::CancellationToken;
use crate::core::{ExceptionType, ExecutionEvent, ExecutionType, Payload, Protected, Strategy};
use crate::errors::{ResilientError, Result};
use crate::events::Emitter;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;

#[derive(Default)]
struct TraceState {
    started: AtomicBool,
    /// Failed attempts whose warn has not been emitted yet.
    pending: Mutex<Vec<ResilientError>>,
}

impl TraceState {
    fn flush(&self, tracer: &ExecutionTracer) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for error in pending {
            tracer.emit_exception(ExceptionType::Warn, error);
        }
    }
}

/// Emits `stop` when dropped, if the execution started.
struct StopOnDrop<'a> {
    tracer: &'a ExecutionTracer,
    state: Arc<TraceState>,
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        if self.state.started.load(Ordering::SeqCst) {
            self.tracer
                .emitter
                .emit(ExecutionEvent::execution(self.tracer.id.clone(), ExecutionType::Stop));
        }
    }
}

/// Wraps a strategy call to emit its lifecycle events.
///
/// Per execution: one `start` on the first entry into the operation, one
/// `warn` per failed attempt except the failure the call ends with, one
/// `error` if the call fails, and one `stop` if it started.
#[derive(Debug, Clone)]
pub struct ExecutionTracer {
    id: String,
    emitter: Emitter,
}

impl ExecutionTracer {
    /// Creates a tracer emitting events for the execution `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, emitter: Emitter) -> Self {
        Self {
            id: id.into(),
            emitter,
        }
    }

    /// Returns the execution id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn emit_exception(&self, kind: ExceptionType, error: ResilientError) {
        self.emitter
            .emit(ExecutionEvent::exception(self.id.clone(), kind, error));
    }

    /// Runs `operation` through `strategy`, emitting events along the way.
    pub async fn trace(
        &self,
        strategy: &dyn Strategy,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload> {
        let state = Arc::new(TraceState::default());
        let _stop = StopOnDrop {
            tracer: self,
            state: Arc::clone(&state),
        };

        let wrapped: Protected = {
            let state = Arc::clone(&state);
            let tracer = self.clone();
            Arc::new(move || {
                state.flush(&tracer);
                if !state.started.swap(true, Ordering::SeqCst) {
                    tracer
                        .emitter
                        .emit(ExecutionEvent::execution(tracer.id.clone(), ExecutionType::Start));
                }

                let attempt = operation();
                let state = Arc::clone(&state);
                async move {
                    let result = attempt.await;
                    if let Err(ref error) = result {
                        state.pending.lock().push(error.clone());
                    }
                    result
                }
                .boxed()
            })
        };

        // Warns of earlier attempts go out whenever the chain is waiting
        // (e.g. during a retry delay), so they precede the final outcome.
        // A panicking strategy fails the call instead of unwinding past the
        // caller's settle and close.
        let mut execution = strategy.execute(wrapped, signal);
        let result = AssertUnwindSafe(futures::future::poll_fn(|cx| {
            let poll = execution.as_mut().poll(cx);
            if poll.is_pending() {
                state.flush(self);
            }
            poll
        }))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ResilientError::panicked(panic.as_ref())));

        let pending = std::mem::take(&mut *state.pending.lock());
        for error in pending {
            let is_final = result.as_ref().err().is_some_and(|last| last.same_as(&error));
            if !is_final {
                self.emit_exception(ExceptionType::Warn, error);
            }
        }
        if let Err(ref error) = result {
            self.emit_exception(ExceptionType::Error, error.clone());
        }

        result
    }
}
