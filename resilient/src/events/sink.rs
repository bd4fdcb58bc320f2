//! Event sink trait and implementations.

use crate::core::{EventGroup, ExecutionEvent};
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn, Level};

/// Trait for sinks observing every event a policy or executor publishes.
///
/// Sinks are called synchronously from the publishing task and must not
/// block. Implementations should never panic.
pub trait EventSink: Send + Sync {
    /// Observes an event.
    fn emit(&self, event: &ExecutionEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &ExecutionEvent) {
        // Intentionally empty - discards all events
    }
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    /// Returns the configured level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    fn log_event(&self, event: &ExecutionEvent) {
        let id = event.id.as_deref().unwrap_or("-");
        let group = event.group().as_str();
        let kind = event.type_name();
        let error = event.error().map(ToString::to_string);

        // Exceptions are never logged below warn when the sink runs at info or above.
        if event.group() == EventGroup::Exception && self.level <= Level::INFO {
            warn!(id = %id, group = %group, event_type = %kind, error = ?error, "Event: {}.{}", group, kind);
            return;
        }

        match self.level {
            Level::TRACE => {
                trace!(id = %id, group = %group, event_type = %kind, error = ?error, "Event: {}.{}", group, kind);
            }
            Level::DEBUG => {
                debug!(id = %id, group = %group, event_type = %kind, error = ?error, "Event: {}.{}", group, kind);
            }
            Level::WARN | Level::ERROR => {
                warn!(id = %id, group = %group, event_type = %kind, error = ?error, "Event: {}.{}", group, kind);
            }
            _ => {
                info!(id = %id, group = %group, event_type = %kind, error = ?error, "Event: {}.{}", group, kind);
            }
        }
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &ExecutionEvent) {
        self.log_event(event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<ExecutionEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.read().clone()
    }

    /// Returns the type names of the collected events, in order.
    #[must_use]
    pub fn types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(ExecutionEvent::type_name).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of the given group.
    #[must_use]
    pub fn events_of_group(&self, group: EventGroup) -> Vec<ExecutionEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.group() == group)
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &ExecutionEvent) {
        self.events.write().push(event.clone());
    }
}
