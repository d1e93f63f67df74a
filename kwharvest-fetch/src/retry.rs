//! Retry strategies for upstream calls.
//!
//! Delays grow as `min(max_delay, base_delay × 2^(attempt-1))`. Upstream
//! calls add ±25% uniform jitter with a 100 ms floor; job rescheduling uses
//! the same curve without jitter.

use rand::Rng;
use std::time::Duration;

use crate::error::FetchError;

/// Shortest jittered delay.
pub const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

/// Relative jitter applied in each direction.
const JITTER_FRACTION: f64 = 0.25;

/// Strategy for retrying failed calls.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Whether to apply jitter.
    pub jitter: bool,
}

impl RetryStrategy {
    /// Creates a new retry strategy (1 s base, 30 s cap, jitter on).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Disables retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculates the un-jittered delay after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Calculates the delay to sleep after failed attempt `attempt`, with jitter.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
        delay.mul_f64(factor).max(MIN_JITTERED_DELAY)
    }

    /// Determines if a failed call should be attempted again.
    ///
    /// Admission refusals, rate limits, server errors, timeouts and network
    /// failures are retried. Authentication rejections and malformed
    /// requests or responses are not.
    pub fn should_retry(&self, error: &FetchError) -> bool {
        match error {
            FetchError::AdmissionDenied { .. } => true,
            FetchError::Upstream(e) => e.is_transient(),
            FetchError::Core(e) => e.is_storage(),
            FetchError::Http(_) | FetchError::Json(_) => false,
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(3)
    }
}
