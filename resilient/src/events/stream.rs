//! Multicast event streams.

use crate::core::ExecutionEvent;
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Default)]
struct StreamState {
    subscribers: Vec<mpsc::UnboundedSender<ExecutionEvent>>,
    /// Present only on replaying streams.
    history: Option<Vec<ExecutionEvent>>,
    closed: bool,
}

/// An append-only, multicast sequence of events terminating in closure.
///
/// Replaying streams deliver their full history to late subscribers, then
/// end once closed. Plain streams only deliver events published after the
/// subscription. Subscribing to a closed plain stream yields an ended
/// subscription.
#[derive(Clone, Default)]
pub struct EventStream {
    inner: Arc<Mutex<StreamState>>,
}

impl EventStream {
    /// Creates a stream without replay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream replaying its history to every subscriber.
    #[must_use]
    pub fn replaying() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamState {
                history: Some(Vec::new()),
                ..StreamState::default()
            })),
        }
    }

    /// Publishes an event to every subscriber.
    ///
    /// Returns false, dropping the event, if the stream is closed.
    pub fn publish(&self, event: &ExecutionEvent) -> bool {
        let mut state = self.inner.lock();
        if state.closed {
            return false;
        }

        if let Some(history) = state.history.as_mut() {
            history.push(event.clone());
        }
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        true
    }

    /// Closes the stream, ending every subscription. Idempotent.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    /// Returns whether the stream is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Subscribes to the stream.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();

        if let Some(history) = state.history.as_ref() {
            for event in history {
                // The receiver is alive; sending cannot fail here.
                let _ = tx.send(event.clone());
            }
        }
        if !state.closed {
            state.subscribers.push(tx);
        }

        EventSubscription { rx }
    }

    /// Returns the recorded history (empty for plain streams).
    #[must_use]
    pub fn history(&self) -> Vec<ExecutionEvent> {
        self.inner.lock().history.clone().unwrap_or_default()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.inner.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("EventStream")
            .field("replaying", &state.history.is_some())
            .field("subscribers", &state.subscribers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A subscription to an [`EventStream`].
///
/// Yields events in publication order and ends when the stream closes.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<ExecutionEvent>,
}

impl EventSubscription {
    /// Receives the next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        self.rx.recv().await
    }

    /// Drains the subscription until the stream ends.
    pub async fn collect_all(mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventSubscription {
    type Item = ExecutionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
