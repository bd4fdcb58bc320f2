//! Declarative strategy chains.
//!
//! ```json
//! {
//!   "strategies": [
//!     { "type": "circuit_breaker", "failure_threshold": 3 },
//!     { "type": "retry", "limit": 2, "delay": 100 },
//!     { "type": "bulkhead", "concurrency": 4, "queue": 16 }
//!   ]
//! }
//! ```

use crate::core::Strategy;
use crate::errors::Result;
use crate::policy::Policy;
use crate::strategies::{
    BulkheadOptions, BulkheadStrategy, CircuitBreakerOptions, CircuitBreakerStrategy,
    ComposedStrategy, RateLimitOptions, RateLimitStrategy, RetryOptions, RetryStrategy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration of a single strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// See [`RetryStrategy`].
    Retry(RetryOptions),
    /// See [`BulkheadStrategy`].
    Bulkhead(BulkheadOptions),
    /// See [`CircuitBreakerStrategy`].
    CircuitBreaker(CircuitBreakerOptions),
    /// See [`RateLimitStrategy`].
    RateLimit(RateLimitOptions),
}

impl StrategyConfig {
    /// Builds a fresh strategy instance with its own state.
    #[must_use]
    pub fn build(&self) -> Arc<dyn Strategy> {
        match *self {
            Self::Retry(options) => Arc::new(RetryStrategy::new(options)),
            Self::Bulkhead(options) => Arc::new(BulkheadStrategy::new(options)),
            Self::CircuitBreaker(options) => Arc::new(CircuitBreakerStrategy::new(options)),
            Self::RateLimit(options) => Arc::new(RateLimitStrategy::new(options)),
        }
    }
}

/// An ordered strategy chain, first = outermost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// The strategies of the chain.
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

impl PolicyConfig {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a chain from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Appends a strategy as the new innermost element.
    #[must_use]
    pub fn with(mut self, strategy: StrategyConfig) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Builds the composed chain.
    ///
    /// Rate limiters spawn their dispatch timer lazily, so building does not
    /// require a runtime.
    #[must_use]
    pub fn build_chain(&self) -> ComposedStrategy {
        ComposedStrategy::new(self.strategies.iter().map(StrategyConfig::build).collect())
    }

    /// Builds a policy over the chain.
    #[must_use]
    pub fn build_policy(&self) -> Policy {
        Policy::from_strategy(self.build_chain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Reason;
    use crate::core::StrategyExt;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_tagged_strategies() {
        let config = PolicyConfig::from_json(
            r#"{
                "strategies": [
                    { "type": "retry", "limit": 5 },
                    { "type": "bulkhead", "concurrency": 2, "queue": 1 },
                    { "type": "circuit_breaker" },
                    { "type": "rate_limit", "limit": 3, "smooth_delay": true }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.strategies,
            vec![
                StrategyConfig::Retry(RetryOptions { limit: 5, delay: 0 }),
                StrategyConfig::Bulkhead(BulkheadOptions { concurrency: 2, queue: 1 }),
                StrategyConfig::CircuitBreaker(CircuitBreakerOptions::default()),
                StrategyConfig::RateLimit(RateLimitOptions {
                    limit: 3,
                    interval: 1_000,
                    smooth_delay: true,
                }),
            ]
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = PolicyConfig::from_json(r#"{"strategies": [{"type": "timeout"}]}"#).unwrap_err();
        assert!(err.to_string().starts_with("Serialization error"));
    }

    #[test]
    fn test_serializes_with_tag() {
        let config = PolicyConfig::new().with(StrategyConfig::Retry(RetryOptions::new(1, 50)));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"strategies": [{"type": "retry", "limit": 1, "delay": 50}]})
        );
    }

    #[tokio::test]
    async fn test_built_chain_applies_strategies() {
        let chain = PolicyConfig::new()
            .with(StrategyConfig::CircuitBreaker(CircuitBreakerOptions {
                failure_threshold: 1,
                half_open_after: 60_000,
            }))
            .build_chain();
        assert_eq!(chain.len(), 1);

        let first = chain
            .run(|| async { Err::<(), _>(anyhow::anyhow!("down")) }, None)
            .await;
        assert!(first.is_err());

        let second = chain
            .run(|| async { anyhow::Ok(()) }, None)
            .await
            .unwrap_err();
        assert!(second.is_reason(Reason::Circuit));
    }

    #[tokio::test]
    async fn test_build_policy() {
        let policy = PolicyConfig::from_json(r#"{"strategies": [{"type": "retry", "limit": 0}]}"#)
            .unwrap()
            .build_policy();
        let request = policy.execute(|| async { anyhow::Ok(3) }, None);
        assert_eq!(request.response().await.unwrap(), 3);
    }
}
