use std::time::Duration;

use quorum_core::config::{EngineConfig, RetryConfig};
use quorum_core::error::QuorumError;

/// Bounded retry for recoverable invoker failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry: &RetryConfig) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: retry.initial_backoff_ms,
            max_backoff_ms: retry.max_backoff_ms,
        }
    }

    pub fn from_config(engine: &EngineConfig, retry: &RetryConfig) -> Self {
        Self::new(engine.max_retries, retry)
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, &RetryConfig::default())
    }

    /// Whether a failure on attempt `attempt` (0-based) should be retried.
    pub fn should_retry(&self, error: &QuorumError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_retries
    }

    /// Exponential backoff for `attempt` (0-based), capped, with 0.8x to 1.2x jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((base as f64 * jitter) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default(), &RetryConfig::default())
    }
}
