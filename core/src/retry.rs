//! Retry eligibility and backoff.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::TransportError;
use crate::http::HttpResponse;

/// Bounded retry policy applied by the executor.
///
/// `max_retries == 0` or a zero `max_interval` disables retries: exactly one
/// attempt is made.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "millis")]
    pub min_interval: Duration,
    #[serde(with = "millis")]
    pub max_interval: Duration,
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            retryable_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_interval: Duration) -> Self {
        Self {
            max_retries,
            max_interval,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Add a status code (for example a 4xx the service uses for transient
    /// conflicts) to the retryable set.
    pub fn allow_status(mut self, status: u16) -> Self {
        self.retryable_statuses.insert(status);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0 && !self.max_interval.is_zero()
    }

    /// Whether another attempt may follow attempt number `attempt` (0-based).
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        self.is_enabled() && attempt < self.max_retries
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    pub fn should_retry_error(&self, error: &TransportError) -> bool {
        error.is_retryable()
    }

    /// Delay before the attempt following `attempt` (0-based).
    ///
    /// Exponential growth from `min_interval`, capped at `max_interval`, with
    /// the upper half jittered. A `Retry-After` header in seconds wins over
    /// the computed value but is still capped.
    pub fn backoff(&self, attempt: u32, response: Option<&HttpResponse>) -> Duration {
        if let Some(secs) = response
            .and_then(|r| r.header("Retry-After"))
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            return Duration::from_secs(secs).min(self.max_interval);
        }

        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        let base = self
            .min_interval
            .saturating_mul(factor)
            .min(self.max_interval);
        let half = base / 2;
        if half.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=half);
        half + jitter
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
