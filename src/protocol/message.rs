//! Message envelope.
//!
//! Every frame exchanged over a connection is one envelope with three fields.
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "type": "echo",
//!   "body": { ... }
//! }
//! ```
//!
//! # Classification
//!
//! | `id` | `type` | Meaning |
//! |------|--------|---------|
//! | present | `Response` / `Error` | response |
//! | present | anything else | request |
//! | absent | any | one-way notification |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::MessageId;

use super::response::{ErrorResponse, Response, ResponseKind};

// ============================================================================
// Reserved Message Types
// ============================================================================

/// Type tags with special meaning in the protocol.
///
/// Applications must not use these for their own messages.
pub mod message_types {
    /// Response to a request that was processed successfully.
    pub const RESPONSE: &str = "Response";

    /// Response to a request that failed.
    pub const ERROR: &str = "Error";

    /// Placeholder for inbound text that could not be decoded.
    pub const UNKNOWN: &str = "Unknown";

    /// Types which mark a message as a response.
    pub const RESPONSE_TYPES: [&str; 2] = [RESPONSE, ERROR];

    /// Returns `true` if `message_type` is reserved.
    #[inline]
    #[must_use]
    pub fn is_reserved(message_type: &str) -> bool {
        matches!(message_type, RESPONSE | ERROR | UNKNOWN)
    }

    /// Returns `true` if `message_type` marks a response.
    #[inline]
    #[must_use]
    pub fn is_response_type(message_type: &str) -> bool {
        RESPONSE_TYPES.contains(&message_type)
    }
}

// ============================================================================
// Message
// ============================================================================

/// An immutable envelope: correlation id, type tag, and opaque body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Message {
    /// Correlation ID. `None` means no response is expected.
    id: Option<MessageId>,

    /// Type tag used for routing. Never empty.
    #[serde(rename = "type")]
    message_type: String,

    /// Application payload.
    body: Value,
}

/// Wire shape before validation.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<MessageId>,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    body: Value,
}

impl TryFrom<RawEnvelope> for Message {
    type Error = Error;

    fn try_from(raw: RawEnvelope) -> Result<Self> {
        Self::from_value(raw.id, raw.message_type, raw.body)
    }
}

// ============================================================================
// Message - Constructors
// ============================================================================

impl Message {
    /// Creates a message, serializing `body` into a JSON value.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMessage`] if `message_type` is empty
    /// - [`Error::Json`] if `body` cannot be serialized
    pub fn new(
        id: Option<MessageId>,
        message_type: impl Into<String>,
        body: impl Serialize,
    ) -> Result<Self> {
        let body = serde_json::to_value(body)?;
        Self::from_value(id, message_type, body)
    }

    /// Creates a one-way notification (no id).
    ///
    /// # Errors
    ///
    /// Same as [`Message::new`].
    pub fn notification(message_type: impl Into<String>, body: impl Serialize) -> Result<Self> {
        Self::new(None, message_type, body)
    }

    /// Creates a message from an already-built body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if `message_type` is empty.
    pub fn from_value(
        id: Option<MessageId>,
        message_type: impl Into<String>,
        body: Value,
    ) -> Result<Self> {
        let message_type = message_type.into();
        if message_type.is_empty() {
            return Err(Error::invalid_message("message type must not be empty"));
        }
        Ok(Self {
            id,
            message_type,
            body,
        })
    }

    /// Best-effort context for inbound text that failed to decode.
    ///
    /// The id is recovered when the text is a JSON object with a string `id`;
    /// the raw text becomes the body and the type is
    /// [`message_types::UNKNOWN`].
    #[must_use]
    pub fn unknown(raw: &str) -> Self {
        let id = serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|value| value.get("id").and_then(Value::as_str).map(MessageId::new));

        Self {
            id,
            message_type: message_types::UNKNOWN.to_string(),
            body: Value::String(raw.to_string()),
        }
    }

    /// Assembles a message from validated parts.
    pub(crate) fn from_parts(id: Option<MessageId>, message_type: String, body: Value) -> Self {
        Self {
            id,
            message_type,
            body,
        }
    }
}

// ============================================================================
// Message - Accessors
// ============================================================================

impl Message {
    /// Returns the correlation ID, if any.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }

    /// Returns the type tag.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Returns the raw body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Consumes the message, returning the raw body.
    #[inline]
    #[must_use]
    pub fn into_body(self) -> Value {
        self.body
    }

    /// Deserializes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the body does not match `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.body)?)
    }

    /// Deserializes the body into `T`, returning `None` on mismatch.
    #[must_use]
    pub fn try_body_as<T: DeserializeOwned>(&self) -> Option<T> {
        T::deserialize(&self.body).ok()
    }
}

// ============================================================================
// Message - Classification
// ============================================================================

impl Message {
    /// Returns `true` if this message expects a response.
    #[inline]
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.id.is_some() && !message_types::is_response_type(&self.message_type)
    }

    /// Returns `true` if this message answers a request.
    #[inline]
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.id.is_some() && message_types::is_response_type(&self.message_type)
    }

    /// Returns `true` if this message is a successful response.
    #[inline]
    #[must_use]
    pub fn is_success_response(&self) -> bool {
        self.id.is_some() && self.message_type == message_types::RESPONSE
    }

    /// Returns `true` if this message is an error response.
    #[inline]
    #[must_use]
    pub fn is_error_response(&self) -> bool {
        self.id.is_some() && self.message_type == message_types::ERROR
    }

    /// Returns `true` if this message has no id.
    #[inline]
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Converts into a [`Response`] if this message classifies as one.
    ///
    /// # Errors
    ///
    /// Returns the message unchanged if it is not a response.
    pub fn try_into_response(self) -> std::result::Result<Response, Self> {
        if !self.is_response() {
            return Err(self);
        }

        let kind = if self.message_type == message_types::ERROR {
            ResponseKind::Error
        } else {
            ResponseKind::Success
        };

        Ok(Response::from_parts(self.id, kind, self.body))
    }

    /// Builds a success response correlated to this message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `body` cannot be serialized.
    pub fn create_response(&self, body: impl Serialize) -> Result<Response> {
        Response::new(self.id.clone(), body)
    }

    /// Builds an error response correlated to this message.
    #[must_use]
    pub fn create_error_response(&self, error: &Error, include_debug_info: bool) -> ErrorResponse {
        ErrorResponse::new(self.id.clone(), error, include_debug_info)
    }
}

// ============================================================================
// Message - Codec
// ============================================================================

impl Message {
    /// Encodes the envelope as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encodes the envelope as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if encoding fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decodes an envelope from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the text is not a well-formed envelope.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::decode(e.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json_pretty() {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
