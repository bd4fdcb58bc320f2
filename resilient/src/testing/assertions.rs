//! Assertions over event streams.

use crate::core::ExecutionEvent;
use crate::events::EventSubscription;

/// Collects every event until the stream closes.
pub async fn collect_events(subscription: EventSubscription) -> Vec<ExecutionEvent> {
    subscription.collect_all().await
}

/// Returns the type names of `events`, e.g. `["start", "stop"]`.
#[must_use]
pub fn event_types(events: &[ExecutionEvent]) -> Vec<&'static str> {
    events.iter().map(ExecutionEvent::type_name).collect()
}

/// Asserts the sequence of event type names.
///
/// # Panics
///
/// Panics if the sequence differs.
pub fn assert_event_types(events: &[ExecutionEvent], expected: &[&str]) {
    let actual = event_types(events);
    assert_eq!(actual, expected, "unexpected event sequence");
}

/// Asserts that every event carries `id`.
///
/// # Panics
///
/// Panics on the first event with another id.
pub fn assert_events_for(events: &[ExecutionEvent], id: &str) {
    for event in events {
        assert_eq!(event.id.as_deref(), Some(id), "event {event} belongs elsewhere");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionType;
    use crate::events::EventStream;

    #[tokio::test]
    async fn test_collect_and_assert() {
        let stream = EventStream::replaying();
        stream.publish(&ExecutionEvent::execution("a", ExecutionType::Start));
        stream.publish(&ExecutionEvent::execution("a", ExecutionType::Stop));
        stream.close();

        let events = collect_events(stream.subscribe()).await;
        assert_event_types(&events, &["start", "stop"]);
        assert_events_for(&events, "a");
    }

    #[test]
    #[should_panic(expected = "unexpected event sequence")]
    fn test_assert_event_types_fails() {
        assert_event_types(&[], &["start"]);
    }
}
