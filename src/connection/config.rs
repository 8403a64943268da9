//! Per-connection configuration.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for a correlated response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default limit of outstanding requests per connection.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1024;

/// Default limit of inbound messages waiting for the controller.
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 1024;

// ============================================================================
// ProxyConfig
// ============================================================================

/// Settings shared by every connection proxy created from it.
///
/// # Example
///
/// ```ignore
/// let config = ProxyConfig::default()
///     .with_request_timeout(Duration::from_secs(5))
///     .with_include_debug_info(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Timeout used by `send_request`.
    pub request_timeout: Duration,

    /// Adds the error type and cause chain to outbound error responses.
    pub include_debug_info: bool,

    /// Maximum outstanding requests before new ones are rejected.
    pub max_pending_requests: usize,

    /// Maximum inbound messages waiting for the controller.
    ///
    /// Responses bypass this queue. Once it is full, further requests are
    /// answered with a `MessageQueueFull` error and notifications are dropped.
    pub max_queued_messages: usize,

    /// Resolve outstanding requests with `ConnectionClosed` as soon as the
    /// connection closes instead of letting them time out.
    pub fail_pending_on_close: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            include_debug_info: false,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            fail_pending_on_close: true,
        }
    }
}

impl ProxyConfig {
    /// Creates the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Enables or disables debug info in error responses.
    #[inline]
    #[must_use]
    pub fn with_include_debug_info(mut self, include_debug_info: bool) -> Self {
        self.include_debug_info = include_debug_info;
        self
    }

    /// Sets the outstanding request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max_pending_requests: usize) -> Self {
        self.max_pending_requests = max_pending_requests;
        self
    }

    /// Sets the inbound queue limit.
    #[inline]
    #[must_use]
    pub fn with_max_queued_messages(mut self, max_queued_messages: usize) -> Self {
        self.max_queued_messages = max_queued_messages;
        self
    }

    /// Chooses whether closing fails outstanding requests immediately.
    #[inline]
    #[must_use]
    pub fn with_fail_pending_on_close(mut self, fail_pending_on_close: bool) -> Self {
        self.fail_pending_on_close = fail_pending_on_close;
        self
    }

    /// Checks the configuration for values no connection can run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the request timeout or either limit is
    /// zero.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::config("request timeout must be greater than zero"));
        }
        if self.max_pending_requests == 0 {
            return Err(Error::config(
                "max pending requests must be greater than zero",
            ));
        }
        if self.max_queued_messages == 0 {
            return Err(Error::config(
                "max queued messages must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
