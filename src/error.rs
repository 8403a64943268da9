//! Error types for WebSocket messaging.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_messaging::{Request, Result};
//!
//! async fn example(connection: &ConnectionHandle) -> Result<()> {
//!     let request = Request::new("echo", "hi")?;
//!     let result = connection.send_request(request).await;
//!     let response = result.into_response()?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidConnectionId`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::InvalidMessage`], [`Error::Decode`], [`Error::UnknownMessageType`] |
//! | Handler | [`Error::Handler`], [`Error::HandlerPanicked`], [`Error::ErrorResponse`] |
//! | Request | [`Error::RequestTimeout`], [`Error::TooManyPendingRequests`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::MessageId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when wiring or configuration is invalid, e.g. starting a
    /// server with no acceptor registered.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Connection ID is missing or empty.
    ///
    /// The registry cannot track a connection without a key.
    #[error("Invalid connection id: {message}")]
    InvalidConnectionId {
        /// Why the ID was rejected.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport operation failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed before the operation could complete.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Message could not be constructed.
    ///
    /// Returned for an empty type tag or a reserved tag used as a request type.
    #[error("Invalid message: {message}")]
    InvalidMessage {
        /// Description of the problem.
        message: String,
    },

    /// Inbound text is not a well-formed envelope.
    #[error("Failed to decode message: {message}")]
    Decode {
        /// Decoder error text.
        message: String,
    },

    /// No handler registered for a message type and no fallback set.
    #[error("Unknown message type: {message_type}")]
    UnknownMessageType {
        /// The unhandled type tag.
        message_type: String,
    },

    // ========================================================================
    // Handler Errors
    // ========================================================================
    /// Application handler failed.
    #[error("Handler error: {message}")]
    Handler {
        /// Description supplied by the handler.
        message: String,
    },

    /// Application callback panicked.
    #[error("Handler panicked: {message}")]
    HandlerPanicked {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// Peer answered a request with an `Error` response.
    #[error("Peer returned an error response: {message}")]
    ErrorResponse {
        /// Error text from the response body.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No correlated response within the timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: MessageId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many outstanding requests on one connection.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPendingRequests {
        /// Requests currently awaiting a response.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    /// Inbound message dropped because the controller is too far behind.
    #[error("Message queue full: {max} messages awaiting the controller")]
    MessageQueueFull {
        /// Configured queue capacity.
        max: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid connection id error.
    #[inline]
    pub fn invalid_connection_id(message: impl Into<String>) -> Self {
        Self::InvalidConnectionId {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an invalid message error.
    #[inline]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an unknown message type error.
    #[inline]
    pub fn unknown_message_type(message_type: impl Into<String>) -> Self {
        Self::UnknownMessageType {
            message_type: message_type.into(),
        }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Creates a handler panicked error.
    #[inline]
    pub fn handler_panicked(message: impl Into<String>) -> Self {
        Self::HandlerPanicked {
            message: message.into(),
        }
    }

    /// Creates an error response error.
    #[inline]
    pub fn error_response(message: impl Into<String>) -> Self {
        Self::ErrorResponse {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: MessageId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a too many pending requests error.
    #[inline]
    pub fn too_many_pending_requests(pending: usize, max: usize) -> Self {
        Self::TooManyPendingRequests { pending, max }
    }

    /// Creates a message queue full error.
    #[inline]
    pub fn message_queue_full(max: usize) -> Self {
        Self::MessageQueueFull { max }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_) | Self::Io(_)
        )
    }

    /// Returns `true` if this error came from application handler code.
    #[inline]
    #[must_use]
    pub fn is_handler_error(&self) -> bool {
        matches!(
            self,
            Self::Handler { .. } | Self::HandlerPanicked { .. } | Self::UnknownMessageType { .. }
        )
    }

    /// Stable name of the error variant.
    ///
    /// Sent as the error type in error responses when debug info is enabled.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::InvalidConnectionId { .. } => "InvalidConnectionId",
            Self::Connection { .. } => "Connection",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::InvalidMessage { .. } => "InvalidMessage",
            Self::Decode { .. } => "Decode",
            Self::UnknownMessageType { .. } => "UnknownMessageType",
            Self::Handler { .. } => "Handler",
            Self::HandlerPanicked { .. } => "HandlerPanicked",
            Self::ErrorResponse { .. } => "ErrorResponse",
            Self::RequestTimeout { .. } => "RequestTimeout",
            Self::TooManyPendingRequests { .. } => "TooManyPendingRequests",
            Self::MessageQueueFull { .. } => "MessageQueueFull",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
            Self::WebSocket(_) => "WebSocket",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
