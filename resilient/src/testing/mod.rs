//! Testing utilities for policies and executors.
//!
//! This module provides:
//! - Call counting and scripted operations
//! - A storage backend with switchable failures
//! - Event stream assertions

mod assertions;
mod mocks;

pub use assertions::{assert_event_types, assert_events_for, collect_events, event_types};
pub use mocks::{CallCounter, FailingStorage};
