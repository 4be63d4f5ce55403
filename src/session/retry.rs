//! Retry cadence for reconnect attempts.
//!
//! The supervisor asks the policy for the delay before each connect attempt
//! after a failure. Returning `None` gives up, which stops the client.
//!
//! | Policy | Delay |
//! |--------|-------|
//! | [`ExponentialBackoff`] | `initial * factor^attempt`, capped, with optional jitter |
//! | [`FixedDelay`] | constant |
//! | [`NoRetry`] | gives up immediately |

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Debug;
use std::time::Duration;

use rand::Rng;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Decides how long to wait before the next connect attempt.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Returns the delay before retry number `attempt` (zero-based), or
    /// `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Validates the policy parameters.
    ///
    /// Called by the client builder for every policy.
    ///
    /// # Errors
    ///
    /// Returns an error message if a parameter is out of range.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

// ============================================================================
// ExponentialBackoff
// ============================================================================

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Share of the delay that is randomized, in `0.0..=1.0`.
    pub jitter: f64,
    /// Retries before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ExponentialBackoff {
    /// Creates the default backoff: 1s doubling up to 60s, 10% jitter,
    /// unlimited attempts.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.1,
            max_attempts: None,
        }
    }

    /// Sets the initial delay.
    #[inline]
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[inline]
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[inline]
    #[must_use]
    pub const fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Sets the jitter share.
    #[inline]
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Limits the number of retries.
    #[inline]
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns the delay before jitter, within `0..=max_delay`.
    fn base_delay(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        // `max` also maps NaN to zero
        base.min(self.max_delay.as_secs_f64()).max(0.0)
    }

    /// Converts seconds to a delay, saturating at `max_delay`.
    fn to_delay(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base == 0.0 {
            return Some(self.to_delay(base));
        }

        let randomized = rand::thread_rng().gen_range(0.0..=base);
        let blended = base * (1.0 - jitter) + randomized * jitter;
        Some(self.to_delay(blended))
    }

    fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("initial_delay must be greater than zero".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("max_delay must be at least initial_delay".to_string());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err("factor must be a finite value >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// FixedDelay
// ============================================================================

/// Constant delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    /// Delay before every retry.
    pub delay: Duration,
    /// Retries before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Creates an unlimited fixed delay.
    #[inline]
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Limits the number of retries.
    #[inline]
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.delay.is_zero() {
            return Err("delay must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// NoRetry
// ============================================================================

/// Never retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
