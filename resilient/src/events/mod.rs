//! Event publication for policies and executors.
//!
//! This module provides:
//! - [`EventStream`], the multicast stream behind request and instance events
//! - the [`EventSink`] family for side-channel observation
//! - [`Emitter`], the fan-out used by one request

mod sink;
mod stream;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
pub use stream::{EventStream, EventSubscription};

use crate::core::ExecutionEvent;
use std::sync::Arc;

/// Fans the events of one request out to its own stream, the instance-wide
/// stream and the configured sink.
///
/// Once the request stream is closed nothing else is forwarded.
#[derive(Clone)]
pub struct Emitter {
    request: EventStream,
    instance: EventStream,
    sink: Arc<dyn EventSink>,
}

impl Emitter {
    /// Creates an emitter.
    #[must_use]
    pub fn new(request: EventStream, instance: EventStream, sink: Arc<dyn EventSink>) -> Self {
        Self {
            request,
            instance,
            sink,
        }
    }

    /// Publishes an event. Returns false if the request stream was closed.
    pub fn emit(&self, event: ExecutionEvent) -> bool {
        if !self.request.publish(&event) {
            return false;
        }
        self.instance.publish(&event);
        self.sink.emit(&event);
        true
    }

    /// Publishes an event to the request stream and the sink only.
    pub fn emit_local(&self, event: ExecutionEvent) -> bool {
        if !self.request.publish(&event) {
            return false;
        }
        self.sink.emit(&event);
        true
    }

    /// Closes the request stream.
    pub fn close(&self) {
        self.request.close();
    }

    /// Returns whether the request stream is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.request.is_closed()
    }

    /// Returns the request stream.
    #[must_use]
    pub fn stream(&self) -> &EventStream {
        &self.request
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("request", &self.request)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionType;

    #[test]
    fn test_emitter_fans_out_until_closed() {
        let request = EventStream::replaying();
        let instance = EventStream::replaying();
        let sink = Arc::new(CollectingEventSink::new());
        let emitter = Emitter::new(request.clone(), instance.clone(), sink.clone());

        assert!(emitter.emit(ExecutionEvent::execution("a", ExecutionType::Start)));
        emitter.close();
        assert!(!emitter.emit(ExecutionEvent::execution("a", ExecutionType::Cancel)));

        assert_eq!(request.history().len(), 1);
        assert_eq!(instance.history().len(), 1);
        assert_eq!(sink.types(), vec!["start"]);
    }

    #[test]
    fn test_emit_local_skips_instance_stream() {
        let request = EventStream::replaying();
        let instance = EventStream::replaying();
        let emitter = Emitter::new(request.clone(), instance.clone(), Arc::new(NoOpEventSink));

        assert!(emitter.emit_local(ExecutionEvent::execution("a", ExecutionType::Clear)));
        assert_eq!(request.history().len(), 1);
        assert!(instance.history().is_empty());
    }
}
