//! Handle to a single policy execution.

use crate::errors::{ResilientError, Result};
use crate::events::{EventStream, EventSubscription};
use tokio::sync::watch;

/// Receiving side of a response that settles exactly once.
pub(crate) type ResponseReceiver<T> = watch::Receiver<Option<Result<T>>>;

/// Waits for a response to settle.
pub(crate) async fn settled<T: Clone>(receiver: &ResponseReceiver<T>) -> Result<T> {
    let mut receiver = receiver.clone();
    let settled = receiver.wait_for(Option::is_some).await;
    match settled {
        Ok(value) => value.clone().unwrap_or_else(|| {
            Err(ResilientError::Internal("response settled without a value".to_string()))
        }),
        Err(_) => Err(ResilientError::Internal(
            "execution ended without settling its response".to_string(),
        )),
    }
}

/// A request started by [`Policy::execute`](super::Policy::execute).
///
/// The event stream replays its history to late subscribers and closes
/// before the response settles.
#[derive(Debug, Clone)]
pub struct PolicyRequest<T> {
    pub(crate) id: String,
    pub(crate) events: EventStream,
    pub(crate) response: ResponseReceiver<T>,
}

impl<T: Clone> PolicyRequest<T> {
    /// Returns the execution id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribes to the events of this execution.
    #[must_use]
    pub fn events(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Waits for the outcome of the execution.
    pub async fn response(&self) -> Result<T> {
        settled(&self.response).await
    }

    /// Returns true once the response has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.response.borrow().is_some()
    }
}
