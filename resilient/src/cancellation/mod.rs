//! Cooperative cancellation.
//!
//! This module provides:
//! - [`CancellationToken`], the shared signal passed through every call
//! - [`CancelListener`], a drop guard deregistering a cancel callback
//! - helpers to check or await an optional signal

mod signal;
mod token;

pub use signal::{sleep_unless_cancelled, throw_if_cancelled, until_cancelled};
pub use token::{CancelCallback, CancelListener, CancellationToken};
