//! Connection-level settings for the delivery and request engine.

use std::time::Duration;

/// Default time a request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Default period between expiry sweeps when no request is due sooner.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// Default prefix for generated reply subjects.
pub const DEFAULT_INBOX_PREFIX: &str = "_INBOX";

/// Settings applied when building a [`crate::Connection`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use streamlink::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .request_timeout(Duration::from_millis(500))
///     .inbox_prefix("_REPLY");
/// assert_eq!(config.request_timeout, Duration::from_millis(500));
/// assert_eq!(config.inbox_prefix, "_REPLY");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for requests that do not set their own.
    pub request_timeout: Duration,
    /// Longest the expiry sweep sleeps when no request is due sooner.
    pub sweep_interval: Duration,
    /// Prefix for generated reply subjects.
    pub inbox_prefix: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            inbox_prefix: DEFAULT_INBOX_PREFIX.to_owned(),
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn inbox_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inbox_prefix = prefix.into();
        self
    }
}
