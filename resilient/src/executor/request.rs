//! Handle to a queued execution.

use crate::cancellation::CancellationToken;
use crate::errors::Result;
use crate::events::{EventStream, EventSubscription};
use crate::policy::{settled, ResponseReceiver};

/// A request started by [`Executor::execute`](super::Executor::execute) or
/// found by [`Executor::query`](super::Executor::query).
///
/// Its event stream replays history to late subscribers and ends after the
/// `clear` event.
#[derive(Debug, Clone)]
pub struct ExecutorRequest<I, O> {
    pub(crate) id: String,
    pub(crate) args: I,
    pub(crate) events: EventStream,
    pub(crate) storage: ResponseReceiver<()>,
    pub(crate) response: ResponseReceiver<O>,
    pub(crate) token: CancellationToken,
}

impl<I, O: Clone> ExecutorRequest<I, O> {
    /// Returns the request id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the arguments the request was queued with.
    #[must_use]
    pub fn args(&self) -> &I {
        &self.args
    }

    /// Subscribes to the events of this request.
    #[must_use]
    pub fn events(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Waits until the request has been persisted.
    pub async fn storage(&self) -> Result<()> {
        settled(&self.storage).await
    }

    /// Waits for the outcome of the execution.
    pub async fn response(&self) -> Result<O> {
        settled(&self.response).await
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
