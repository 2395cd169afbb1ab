//! Exponential backoff for transient failures.
//!
//! This is separate from auth-refresh retries: it covers flaky statuses and
//! timeouts, not expired sessions. Connection-refused style errors are not
//! retried; a timeout may be transient load, a dead host usually is not.

use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const JITTER_MAX_MS: u64 = 1_000;

/// Statuses retried by default: request timeout, rate limiting, and the
/// transient 5xx family.
const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }

    /// Disable transient retries entirely.
    #[must_use]
    pub fn none() -> Self {
        Self::new().with_max_retries(0)
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_retryable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before the given attempt: `base * 2^attempt + jitter`, capped.
    /// The jitter spreads retries so many clients recovering from the same
    /// outage do not stampede in lockstep.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(31);
        let factor = 1u32 << shift;
        let exponential = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS));
        let delay = exponential.saturating_add(jitter);
        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
