//! Retry strategy.

use crate::cancellation::{sleep_unless_cancelled, throw_if_cancelled, CancellationToken};
use crate::core::{Payload, Protected, Strategy};
use crate::errors::Result;
use crate::utils::{bound, millis};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Options for [`RetryStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum retry attempts, first call excluded. Negative means unbounded.
    pub limit: i64,
    /// Delay between attempts in milliseconds. Negative is treated as zero.
    pub delay: i64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self { limit: 3, delay: 0 }
    }
}

impl RetryOptions {
    /// Creates options with the given limit and delay.
    #[must_use]
    pub const fn new(limit: i64, delay: i64) -> Self {
        Self { limit, delay }
    }

    /// Sets the retry limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub const fn with_delay(mut self, delay: i64) -> Self {
        self.delay = delay;
        self
    }
}

/// Re-runs a failed operation up to a limit, waiting between attempts.
///
/// The last failure is returned once the limit is exceeded or the signal
/// is set. A cancellation during the wait rejects with a cancel error.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    limit: Option<u64>,
    delay: Duration,
}

impl RetryStrategy {
    /// Creates a new retry strategy.
    #[must_use]
    pub fn new(options: RetryOptions) -> Self {
        Self {
            limit: bound(options.limit),
            delay: millis(options.delay),
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

#[async_trait]
impl Strategy for RetryStrategy {
    async fn execute(
        &self,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload> {
        throw_if_cancelled(signal.as_ref())?;

        let mut attempts: u64 = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempts += 1;
            let exhausted = self.limit.is_some_and(|limit| attempts > limit);
            if exhausted || signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(err);
            }

            debug!(attempt = attempts, delay = ?self.delay, error = %err, "Retrying operation");
            sleep_unless_cancelled(self.delay, signal.as_ref()).await?;
        }
    }
}
