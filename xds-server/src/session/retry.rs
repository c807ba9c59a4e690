//! Backoff for resending a rejected version.

use std::time::Duration;

use crate::error::{Error, Result};

/// How a session reacts to a client rejecting a pushed version.
///
/// After a nack the session waits, then reconciles the client against its
/// last accepted state and pushes again. The wait grows exponentially up to
/// `max_backoff`. After `retry_ceiling` consecutive nacks for the same type
/// the session gives up and closes.
///
/// # Example
///
/// ```
/// use xds_server::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_initial_backoff(Duration::from_millis(200)).unwrap()
///     .with_max_backoff(Duration::from_secs(10)).unwrap()
///     .with_retry_ceiling(Some(3));
/// assert_eq!(policy.backoff_duration(1), Some(Duration::from_millis(400)));
/// assert_eq!(policy.backoff_duration(3), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Wait before the first resend.
    ///
    /// Default: 1 second.
    pub initial_backoff: Duration,

    /// Upper bound on the wait.
    ///
    /// Default: 30 seconds.
    pub max_backoff: Duration,

    /// Growth factor applied per consecutive nack.
    ///
    /// Default: 2.0.
    pub backoff_multiplier: f64,

    /// Consecutive nacks tolerated per type before the session is closed.
    /// `None` retries forever.
    ///
    /// Default: 5.
    pub retry_ceiling: Option<usize>,
}

impl RetryPolicy {
    /// Create a policy with custom backoff parameters and the default
    /// retry ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `initial_backoff` is zero,
    /// `backoff_multiplier` is below 1.0, or `max_backoff` is shorter than
    /// `initial_backoff`.
    pub fn new(
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        Self::default()
            .with_max_backoff(Duration::MAX)?
            .with_initial_backoff(initial_backoff)?
            .with_max_backoff(max_backoff)?
            .with_backoff_multiplier(backoff_multiplier)
    }

    /// Set the initial backoff.
    ///
    /// # Errors
    ///
    /// Returns an error if `duration` is zero or exceeds `max_backoff`.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::Validation(
                "initial_backoff must be greater than zero".into(),
            ));
        }
        if duration > self.max_backoff {
            let max_backoff = self.max_backoff;
            return Err(Error::Validation(format!(
                "initial_backoff ({duration:?}) must be <= max_backoff ({max_backoff:?})"
            )));
        }
        self.initial_backoff = duration;
        Ok(self)
    }

    /// Set the maximum backoff.
    ///
    /// # Errors
    ///
    /// Returns an error if `duration` is shorter than `initial_backoff`.
    pub fn with_max_backoff(mut self, duration: Duration) -> Result<Self> {
        if duration < self.initial_backoff {
            let initial_backoff = self.initial_backoff;
            return Err(Error::Validation(format!(
                "max_backoff ({duration:?}) must be >= initial_backoff ({initial_backoff:?})"
            )));
        }
        self.max_backoff = duration;
        Ok(self)
    }

    /// Set the backoff multiplier.
    ///
    /// # Errors
    ///
    /// Returns an error if `multiplier` is below 1.0.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Result<Self> {
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::Validation(format!(
                "backoff_multiplier must be >= 1.0, got {multiplier}"
            )));
        }
        self.backoff_multiplier = multiplier;
        Ok(self)
    }

    /// Set the retry ceiling. `None` disables it.
    pub fn with_retry_ceiling(mut self, ceiling: Option<usize>) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    /// The wait before resend number `attempt` (0-indexed), or `None` once
    /// the retry ceiling is reached.
    pub fn backoff_duration(&self, attempt: usize) -> Option<Duration> {
        if self.retry_ceiling.is_some_and(|ceiling| attempt >= ceiling) {
            return None;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if secs >= self.max_backoff.as_secs_f64() {
            return Some(self.max_backoff);
        }
        // `backoff_multiplier` is a public field and may be negative or NaN.
        Some(Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retry_ceiling: Some(5),
        }
    }
}

/// Consecutive-nack counter for one resource type of one session.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: usize,
}

impl Backoff {
    /// Start counting from zero.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a nack and return the wait before resending, or `None` if the
    /// retry ceiling is exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let duration = self.policy.backoff_duration(self.attempt)?;
        self.attempt += 1;
        Some(duration)
    }

    /// Number of nacks recorded since the last reset.
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Reset after the client accepts a version.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
