//! Rate limit strategy.

mod queue;

use crate::cancellation::{throw_if_cancelled, until_cancelled, CancellationToken};
use crate::core::{Payload, Protected, Strategy};
use crate::errors::{ResilientError, Result};
use crate::utils::millis;
use async_trait::async_trait;
use queue::RateLimitQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Options for [`RateLimitStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitOptions {
    /// Calls allowed per interval. Negative means unbounded.
    pub limit: i64,
    /// Length of the sliding window in milliseconds.
    pub interval: i64,
    /// Spread dispatches evenly over the interval.
    pub smooth_delay: bool,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            interval: 1_000,
            smooth_delay: false,
        }
    }
}

impl RateLimitOptions {
    /// Creates options with the given limit and interval, without smoothing.
    #[must_use]
    pub const fn new(limit: i64, interval: i64) -> Self {
        Self {
            limit,
            interval,
            smooth_delay: false,
        }
    }

    /// Sets the limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: i64) -> Self {
        self.interval = interval;
        self
    }

    /// Enables or disables smoothing.
    #[must_use]
    pub const fn with_smooth_delay(mut self, smooth_delay: bool) -> Self {
        self.smooth_delay = smooth_delay;
        self
    }
}

/// Allows at most `limit` dispatches per sliding `interval`, delaying the
/// rest in FIFO order.
///
/// Cancelling a waiting call removes it from the queue without running it.
pub struct RateLimitStrategy {
    queue: Arc<RateLimitQueue>,
}

impl RateLimitStrategy {
    /// Creates a new rate limit strategy.
    #[must_use]
    pub fn new(options: RateLimitOptions) -> Self {
        Self {
            queue: Arc::new(RateLimitQueue::new(
                options.limit,
                millis(options.interval),
                options.smooth_delay,
            )),
        }
    }

    /// Returns the number of calls waiting for dispatch.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.queue.len()
    }
}

impl Default for RateLimitStrategy {
    fn default() -> Self {
        Self::new(RateLimitOptions::default())
    }
}

impl std::fmt::Debug for RateLimitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitStrategy")
            .field("waiting", &self.queue.len())
            .finish()
    }
}

/// Removes a call from the queue unless it was dispatched.
struct Waiting<'a> {
    queue: &'a RateLimitQueue,
    id: u64,
    dispatched: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if !self.dispatched {
            self.queue.dequeue(self.id);
        }
    }
}

#[async_trait]
impl Strategy for RateLimitStrategy {
    async fn execute(
        &self,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload> {
        throw_if_cancelled(signal.as_ref())?;

        let (id, go) = self.queue.enqueue();
        let mut waiting = Waiting {
            queue: &self.queue,
            id,
            dispatched: false,
        };

        tokio::select! {
            biased;
            dispatched = go => {
                waiting.dispatched = true;
                dispatched.map_err(|_| ResilientError::Internal("rate limit queue dropped a call".to_string()))?;
            }
            () = until_cancelled(signal.as_ref()) => {
                return Err(ResilientError::cancel());
            }
        }

        operation().await
    }
}
