// src/retry/strategy.rs

use crate::config::RetryConfig;
use hyper::StatusCode;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Attempt budget per request, first try included. Never below one.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.config.attempt_timeout()
    }

    /// Pause before the attempt following failed attempt number `attempt`.
    /// Exponential backoff with jitter; zero when no base delay is configured.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base().as_millis() as u64;
        if base == 0 || attempt == 0 {
            return Duration::ZERO;
        }
        let max = self.config.backoff_max().as_millis() as u64;

        // Exponential backoff: base * 2^(attempt - 1)
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt - 1));

        // Cap at maximum
        let capped = exponential.min(max);

        // Add jitter (0-25% of the calculated backoff)
        let jitter = (capped as f64 * rand::random::<f64>() * 0.25) as u64;

        Duration::from_millis(capped + jitter)
    }

    /// Whether a backend response status should be treated as a failed attempt.
    pub fn is_retryable_status(status: StatusCode) -> RetryDecision {
        match status {
            // Retry on server errors and specific client errors
            StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => RetryDecision::Retry,

            // Don't retry on client errors (except the ones above)
            s if s.is_client_error() => RetryDecision::NoRetry,

            // Retry on other server errors
            s if s.is_server_error() => RetryDecision::Retry,

            // Don't retry on success or other statuses
            _ => RetryDecision::NoRetry,
        }
    }
}
