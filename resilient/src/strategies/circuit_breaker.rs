//! Circuit breaker strategy.

use crate::cancellation::{throw_if_cancelled, CancellationToken};
use crate::core::{Payload, Protected, Strategy};
use crate::errors::{Reason, ResilientError, Result};
use crate::utils::{bound, millis};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Options for [`CircuitBreakerStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit. Negative means never.
    pub failure_threshold: i64,
    /// Time in milliseconds after opening before a call is let through.
    pub half_open_after: i64,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_after: 30_000,
        }
    }
}

impl CircuitBreakerOptions {
    /// Creates options with the given threshold and half-open delay.
    #[must_use]
    pub const fn new(failure_threshold: i64, half_open_after: i64) -> Self {
        Self {
            failure_threshold,
            half_open_after,
        }
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, failure_threshold: i64) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// Sets the half-open delay.
    #[must_use]
    pub const fn with_half_open_after(mut self, half_open_after: i64) -> Self {
        self.half_open_after = half_open_after;
        self
    }
}

#[derive(Debug, Default)]
struct CircuitState {
    failures: u64,
    half_open_at: Option<Instant>,
}

/// Rejects calls once a number of consecutive failures is reached, letting
/// calls through again after a delay.
///
/// Once the circuit has opened it stays pinned: a success after reopening
/// does not reset the counters, and every later failure reopens it for
/// another `half_open_after`.
#[derive(Debug)]
pub struct CircuitBreakerStrategy {
    threshold: Option<u64>,
    half_open_after: Duration,
    state: Mutex<CircuitState>,
}

impl CircuitBreakerStrategy {
    /// Creates a new circuit breaker.
    #[must_use]
    pub fn new(options: CircuitBreakerOptions) -> Self {
        Self {
            threshold: bound(options.failure_threshold),
            half_open_after: millis(options.half_open_after),
            state: Mutex::new(CircuitState::default()),
        }
    }

    /// Returns the current consecutive failure count.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.state.lock().failures
    }

    /// Returns true if a call made now would be rejected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.admits(&self.state.lock(), Instant::now())
    }

    fn admits(&self, state: &CircuitState, now: Instant) -> bool {
        let below = self.threshold.map_or(true, |threshold| state.failures < threshold);
        below || state.half_open_at.is_some_and(|at| now >= at)
    }

    fn update(&self, failed: bool) {
        let Some(threshold) = self.threshold else {
            return;
        };
        let mut state = self.state.lock();

        if failed {
            if state.half_open_at.is_some() {
                state.failures = threshold;
            } else if state.failures < threshold {
                state.failures += 1;
            }
            if state.failures >= threshold {
                state.half_open_at = Some(Instant::now() + self.half_open_after);
                warn!(failures = state.failures, half_open_after = ?self.half_open_after, "Circuit opened");
            }
        } else if state.half_open_at.is_none() {
            state.failures = 0;
        }
    }
}

impl Default for CircuitBreakerStrategy {
    fn default() -> Self {
        Self::new(CircuitBreakerOptions::default())
    }
}

#[async_trait]
impl Strategy for CircuitBreakerStrategy {
    async fn execute(
        &self,
        operation: Protected,
        signal: Option<CancellationToken>,
    ) -> Result<Payload> {
        throw_if_cancelled(signal.as_ref())?;

        let admitted = {
            let state = self.state.lock();
            self.admits(&state, Instant::now())
        };
        if !admitted {
            debug!("Circuit rejected call");
            return Err(ResilientError::circuit());
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.update(false),
            Err(err) if err.is_reason(Reason::Cancel) => {}
            Err(_) => self.update(true),
        }
        result
    }
}
