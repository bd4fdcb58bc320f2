//! # Resilient
//!
//! Composable resilience strategies with observable executions.
//!
//! Resilient provides:
//!
//! - **Strategies**: retry, bulkhead, circuit breaker and rate limit, nested
//!   into a single chain with [`compose`](strategies::compose)
//! - **Policies**: run an operation through a chain and observe it as a
//!   stream of `start`/`warn`/`error`/`cancel`/`stop` events
//! - **Durable executor**: persist requests to a key-value store, run them
//!   through a chain and clear them once finished
//! - **Cancellation**: a shared token observed by every strategy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resilient::prelude::*;
//!
//! let policy = Policy::new(vec![
//!     Arc::new(CircuitBreakerStrategy::new(CircuitBreakerOptions::default())),
//!     Arc::new(RetryStrategy::new(RetryOptions::new(3, 100))),
//! ]);
//!
//! let request = policy.execute(|| async { fetch().await }, None);
//! let mut events = request.events();
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! let body = request.response().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod policy;
pub mod storage;
pub mod strategies;
pub mod testing;
pub mod utils;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancelListener, CancellationToken};
    pub use crate::config::{PolicyConfig, StrategyConfig};
    pub use crate::core::{
        EventGroup, ExceptionType, ExecutionEvent, ExecutionType, Strategy, StrategyExt,
    };
    pub use crate::errors::{ExecutionError, Reason, ResilientError, Result};
    pub use crate::events::{
        CollectingEventSink, EventSink, EventSubscription, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::executor::{Executor, ExecutorBuilder, ExecutorRequest};
    pub use crate::observability::{init_logging, LoggingConfig};
    pub use crate::policy::{Policy, PolicyRequest};
    pub use crate::storage::{MemoryStorage, Mutation, Storage, StorageResponse};
    pub use crate::strategies::{
        compose, BulkheadOptions, BulkheadStrategy, CircuitBreakerOptions,
        CircuitBreakerStrategy, ComposedStrategy, RateLimitOptions, RateLimitStrategy,
        RetryOptions, RetryStrategy,
    };
}
