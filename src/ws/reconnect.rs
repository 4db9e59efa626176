//! Reconnection policy with bounded exponential backoff.
//!
//! The delay before retry `n` (counting from zero) is
//! `min(max_delay, initial_delay * backoff_factor^n)`. After `max_retries`
//! retries the policy gives up. A successful connection resets the policy.

use std::time::Duration;

use crate::constants::limits;

/// Configuration for reconnection behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (at most 300).
    pub max_retries: u32,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay (at least 5 seconds).
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: limits::RECONNECT_MAX_TRIES,
            initial_delay: limits::RECONNECT_INITIAL_DELAY,
            max_delay: limits::RECONNECT_MAX_DELAY,
            backoff_factor: limits::RECONNECT_BACKOFF_FACTOR,
        }
    }
}

impl ReconnectConfig {
    /// Bring out-of-range values back into range, logging a warning for each.
    pub fn clamped(mut self) -> Self {
        self.max_retries = clamp_max_retries(self.max_retries);
        self.max_delay = clamp_max_delay(self.max_delay);
        self.initial_delay = clamp_initial_delay(self.initial_delay);
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            tracing::warn!(
                backoff_factor = self.backoff_factor,
                "backoff factor must be a finite value >= 1, using {}",
                limits::RECONNECT_BACKOFF_FACTOR
            );
            self.backoff_factor = limits::RECONNECT_BACKOFF_FACTOR;
        }
        if self.initial_delay > self.max_delay {
            self.initial_delay = self.max_delay;
        }
        self
    }
}

/// Clamp the number of reconnection attempts to the hard ceiling.
pub(crate) fn clamp_max_retries(n: u32) -> u32 {
    if n > limits::MAX_RECONNECT_MAX_TRIES {
        tracing::warn!(
            "`reconnect_max_tries` can not be more than {max}. Setting to highest possible value - {max}.",
            max = limits::MAX_RECONNECT_MAX_TRIES
        );
        limits::MAX_RECONNECT_MAX_TRIES
    } else {
        n
    }
}

/// Clamp the reconnect delay cap to the hard floor.
pub(crate) fn clamp_max_delay(d: Duration) -> Duration {
    if d < limits::MIN_RECONNECT_MAX_DELAY {
        tracing::warn!(
            "`reconnect_max_delay` can not be less than {min:?}. Setting to lowest possible value - {min:?}.",
            min = limits::MIN_RECONNECT_MAX_DELAY
        );
        limits::MIN_RECONNECT_MAX_DELAY
    } else {
        d
    }
}

/// Clamp the first reconnect delay to the hard floor.
pub(crate) fn clamp_initial_delay(d: Duration) -> Duration {
    if d < limits::MIN_RECONNECT_INITIAL_DELAY {
        tracing::warn!(
            "`reconnect_initial_delay` can not be less than {min:?}. Setting to lowest possible value - {min:?}.",
            min = limits::MIN_RECONNECT_INITIAL_DELAY
        );
        limits::MIN_RECONNECT_INITIAL_DELAY
    } else {
        d
    }
}

/// Reconnection state: attempt counter and current delay.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kite_rs::ws::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     max_retries: 2,
///     ..Default::default()
/// });
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert!(policy.next_delay().is_some());
/// assert_eq!(policy.next_delay(), None);
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy from a (clamped) configuration.
    pub fn new(config: ReconnectConfig) -> Self {
        let config = config.clamped();
        Self {
            current_delay: config.initial_delay,
            config,
            attempt_count: 0,
        }
    }

    /// Delay to wait before the next attempt, counting the attempt.
    ///
    /// Returns `None` once `max_retries` attempts have been made.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.current_delay;
        let scaled = (delay.as_millis() as f64 * self.config.backoff_factor).round();
        let next = if scaled.is_finite() && scaled < u64::MAX as f64 {
            Duration::from_millis(scaled as u64)
        } else {
            self.config.max_delay
        };
        self.current_delay = next.min(self.config.max_delay);
        Some(delay)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    pub fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_retries
    }

    /// The effective configuration.
    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }
}
