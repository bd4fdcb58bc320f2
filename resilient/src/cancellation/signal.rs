//! Helpers for optional cancellation signals.

use super::CancellationToken;
use crate::errors::{ResilientError, Result};
use std::time::Duration;

/// Fails with a cancel error if the signal is already set.
pub fn throw_if_cancelled(signal: Option<&CancellationToken>) -> Result<()> {
    match signal {
        Some(token) if token.is_cancelled() => Err(ResilientError::cancel()),
        _ => Ok(()),
    }
}

/// Completes when the signal is set. Never completes without a signal.
pub async fn until_cancelled(signal: Option<&CancellationToken>) {
    match signal {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Sleeps for `delay`, failing with a cancel error as soon as the signal is set.
pub async fn sleep_unless_cancelled(
    delay: Duration,
    signal: Option<&CancellationToken>,
) -> Result<()> {
    throw_if_cancelled(signal)?;

    tokio::select! {
        biased;
        () = until_cancelled(signal) => Err(ResilientError::cancel()),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
