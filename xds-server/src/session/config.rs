//! Configuration for the xDS server.

use crate::error::{Error, Result};
use crate::session::retry::RetryPolicy;

/// Configuration shared by the resource store and the session manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Backoff and retry ceiling applied when a client nacks.
    pub retry_policy: RetryPolicy,

    /// Snapshots retained per resource type, including the current one.
    ///
    /// Two covers clients that momentarily ack the previous version.
    pub retained_versions: usize,

    /// Publish notifications buffered per session before it lags.
    ///
    /// A lagging session reconciles every type it is subscribed to, so
    /// overflowing this buffer costs work but never loses updates.
    pub publish_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            retained_versions: 2,
            publish_channel_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy.
    ///
    /// # Example
    ///
    /// ```
    /// use xds_server::{RetryPolicy, ServerConfig};
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default()
    ///     .with_initial_backoff(Duration::from_millis(500)).unwrap()
    ///     .with_retry_ceiling(Some(10));
    ///
    /// let config = ServerConfig::new().with_retry_policy(policy);
    /// assert_eq!(config.retry_policy.retry_ceiling, Some(10));
    /// ```
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set how many snapshots are retained per type.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is zero.
    pub fn with_retained_versions(mut self, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::Validation(
                "retained_versions must be at least 1".into(),
            ));
        }
        self.retained_versions = count;
        Ok(self)
    }

    /// Set the publish notification buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero.
    pub fn with_publish_channel_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Validation(
                "publish_channel_capacity must be at least 1".into(),
            ));
        }
        self.publish_channel_capacity = capacity;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_rejected() {
        assert!(ServerConfig::new().with_retained_versions(0).is_err());
        assert!(ServerConfig::new().with_publish_channel_capacity(0).is_err());

        let config = ServerConfig::new().with_retained_versions(4).unwrap();
        assert_eq!(config.retained_versions, 4);
    }
}
