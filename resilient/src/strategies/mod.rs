//! Built-in resilience strategies and their composition.
//!
//! - [`RetryStrategy`] re-runs failed operations
//! - [`BulkheadStrategy`] limits concurrency with a bounded wait queue
//! - [`CircuitBreakerStrategy`] rejects calls after repeated failures
//! - [`RateLimitStrategy`] spaces dispatches over a sliding window
//! - [`ComposedStrategy`] nests an ordered chain of strategies

mod bulkhead;
mod circuit_breaker;
mod composer;
mod rate_limit;
mod retry;

pub use bulkhead::{BulkheadOptions, BulkheadStrategy};
pub use circuit_breaker::{CircuitBreakerOptions, CircuitBreakerStrategy};
pub use composer::{compose, ComposedStrategy};
pub use rate_limit::{RateLimitOptions, RateLimitStrategy};
pub use retry::{RetryOptions, RetryStrategy};
