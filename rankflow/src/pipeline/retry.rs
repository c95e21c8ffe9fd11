//! Retry utilities with configurable backoff and jitter strategies.
//!
//! A stage's retry budget (`max_retries`) is resolved by the manager; this
//! module decides whether another attempt is allowed and how long to wait
//! before it.

use crate::errors::TaskError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Delay configuration between stage attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that retries immediately.
    #[must_use]
    pub fn immediate() -> Self {
        Self::new()
            .with_base_delay_ms(0)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::None)
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// Retry bookkeeping for one stage.
#[derive(Debug, Clone)]
pub struct RetryState {
    max_retries: usize,
    retries: usize,
    previous_delay: Option<u64>,
}

impl RetryState {
    /// Creates a state allowing `max_retries` re-attempts after the first.
    #[must_use]
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            retries: 0,
            previous_delay: None,
        }
    }

    /// Number of retries granted so far.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Number of attempts started so far, counting the first.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.retries + 1
    }

    /// Returns true once no retry remains.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }

    /// Calculates the delay before the next retry.
    #[must_use]
    pub fn calculate_delay(&mut self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let retry = self.retries;

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(retry).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exponent)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(retry as u64 + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let next = if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                self.previous_delay = Some(next);
                next
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides whether a failed attempt is re-run, consuming one retry if so.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig, error: &TaskError) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::NotRetryable;
    }
    if state.is_exhausted() {
        return RetryDecision::GiveUp;
    }

    let delay = state.calculate_delay(config);
    state.retries += 1;
    RetryDecision::Retry(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(config.jitter_strategy, JitterStrategy::Full);
    }

    #[test]
    fn test_retry_config_deserialize_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"backoff_strategy": "linear"}"#).unwrap();
        assert_eq!(config.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(config.base_delay_ms, 500);
    }

    #[test]
    fn test_calculate_delay_exponential_no_jitter() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new(5);

        assert_eq!(state.calculate_delay(&config), Duration::from_millis(100));
        state.retries = 1;
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(200));
        state.retries = 2;
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(400));
    }

    #[test]
    fn test_calculate_delay_linear_no_jitter() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new(5);

        state.retries = 2;
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(300));
    }

    #[test]
    fn test_calculate_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new(20);
        state.retries = 10;

        assert_eq!(state.calculate_delay(&config), Duration::from_millis(5000));
    }

    #[test]
    fn test_calculate_delay_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        let mut state = RetryState::new(1);

        for _ in 0..10 {
            assert!(state.calculate_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_should_retry_bounds() {
        let config = RetryConfig::immediate();
        let err = TaskError::retryable("flaky");
        let mut state = RetryState::new(2);

        assert!(matches!(should_retry(&mut state, &config, &err), RetryDecision::Retry(_)));
        assert!(matches!(should_retry(&mut state, &config, &err), RetryDecision::Retry(_)));
        assert_eq!(should_retry(&mut state, &config, &err), RetryDecision::GiveUp);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_should_retry_not_retryable() {
        let mut state = RetryState::new(5);
        let decision = should_retry(&mut state, &RetryConfig::immediate(), &TaskError::fatal("x"));
        assert_eq!(decision, RetryDecision::NotRetryable);
        assert_eq!(state.retries(), 0);
    }
}
