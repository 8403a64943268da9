//! Request and Response message types.
//!
//! Typed views over the [`Message`] envelope for the two sides of a
//! correlated exchange.
//!
//! # Format
//!
//! Request:
//! ```json
//! { "id": "uuid", "type": "echo", "body": "hi" }
//! ```
//!
//! Success:
//! ```json
//! { "id": "uuid", "type": "Response", "body": "hi" }
//! ```
//!
//! Error:
//! ```json
//! { "id": "uuid", "type": "Error", "body": { "message": "Unknown message type: missing" } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;

use super::message::{Message, message_types};

// ============================================================================
// Request
// ============================================================================

/// A message that expects a response.
///
/// Always carries an id; the type is application-defined.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    id: MessageId,

    /// Application type tag.
    message_type: String,

    /// Request payload.
    body: Value,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMessage`] if `message_type` is empty or reserved
    /// - [`Error::Json`] if `body` cannot be serialized
    pub fn new(message_type: impl Into<String>, body: impl Serialize) -> Result<Self> {
        Self::with_id(MessageId::generate(), message_type, body)
    }

    /// Creates a new request with specific ID.
    ///
    /// # Errors
    ///
    /// Same as [`Request::new`].
    pub fn with_id(
        id: MessageId,
        message_type: impl Into<String>,
        body: impl Serialize,
    ) -> Result<Self> {
        let message_type = message_type.into();
        if message_type.is_empty() {
            return Err(Error::invalid_message("request type must not be empty"));
        }
        if message_types::is_reserved(&message_type) {
            return Err(Error::invalid_message(format!(
                "request type '{message_type}' is reserved"
            )));
        }

        Ok(Self {
            id,
            message_type,
            body: serde_json::to_value(body)?,
        })
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
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
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::from_parts(Some(request.id), request.message_type, request.body)
    }
}

impl TryFrom<Message> for Request {
    type Error = Error;

    fn try_from(message: Message) -> Result<Self> {
        if !message.is_request() {
            return Err(Error::invalid_message(format!(
                "message of type '{}' is not a request",
                message.message_type()
            )));
        }
        let id = message
            .id()
            .cloned()
            .ok_or_else(|| Error::invalid_message("request has no id"))?;
        let message_type = message.message_type().to_string();

        Ok(Self {
            id,
            message_type,
            body: message.into_body(),
        })
    }
}

// ============================================================================
// ResponseKind
// ============================================================================

/// Response type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// The request was processed.
    Success,
    /// The request failed.
    Error,
}

impl ResponseKind {
    /// Wire type tag for this kind.
    #[inline]
    #[must_use]
    pub const fn message_type(self) -> &'static str {
        match self {
            Self::Success => message_types::RESPONSE,
            Self::Error => message_types::ERROR,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A message sent in answer to a request.
///
/// The id is the originating request's id. It is `None` only when answering
/// a notification that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Matches the request `id`.
    id: Option<MessageId>,

    /// Response type.
    kind: ResponseKind,

    /// Result data, or an [`ErrorBody`] for errors.
    body: Value,
}

impl Response {
    /// Creates a success response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `body` cannot be serialized.
    pub fn new(request_id: Option<MessageId>, body: impl Serialize) -> Result<Self> {
        Ok(Self {
            id: request_id,
            kind: ResponseKind::Success,
            body: serde_json::to_value(body)?,
        })
    }

    /// Creates a success response to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `body` cannot be serialized.
    pub fn to(request: &Request, body: impl Serialize) -> Result<Self> {
        Self::new(Some(request.id.clone()), body)
    }

    pub(crate) fn from_parts(id: Option<MessageId>, kind: ResponseKind, body: Value) -> Self {
        Self { id, kind, body }
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }

    /// Returns the response kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// Returns the wire type tag.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        self.kind.message_type()
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    /// Returns the raw body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Deserializes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the body does not match `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.body)?)
    }

    /// Parses the body as an [`ErrorBody`] if this is an error response.
    #[must_use]
    pub fn error_body(&self) -> Option<ErrorBody> {
        if !self.is_error() {
            return None;
        }
        match ErrorBody::deserialize(&self.body) {
            Ok(body) => Some(body),
            Err(_) => Some(ErrorBody::from_message(self.body.to_string())),
        }
    }

    /// Extracts the result value, returning error if response was error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ErrorResponse`] if the response was an error.
    pub fn into_result(self) -> Result<Value> {
        match self.kind {
            ResponseKind::Success => Ok(self.body),
            ResponseKind::Error => {
                let message = self
                    .error_body()
                    .map(|body| body.message)
                    .unwrap_or_else(|| "unknown error".to_string());
                Err(Error::error_response(message))
            }
        }
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::from_parts(
            response.id,
            response.kind.message_type().to_string(),
            response.body,
        )
    }
}

// ============================================================================
// ErrorBody
// ============================================================================

/// Serialized description of a failure, carried in an `Error` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human-readable error text.
    pub message: String,

    /// Error kind name (debug info only).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Source chain, outermost first (debug info only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causes: Option<Vec<String>>,
}

impl ErrorBody {
    /// Describes `error`, optionally including its kind and source chain.
    #[must_use]
    pub fn from_error(error: &Error, include_debug_info: bool) -> Self {
        if !include_debug_info {
            return Self::from_message(error.to_string());
        }

        let mut causes = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = std::error::Error::source(cause);
        }

        Self {
            message: error.to_string(),
            error_type: Some(error.kind().to_string()),
            causes: Some(causes),
        }
    }

    /// An error body with only a message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            causes: None,
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("message".into(), Value::String(self.message.clone()));
        if let Some(error_type) = &self.error_type {
            map.insert("type".into(), Value::String(error_type.clone()));
        }
        if let Some(causes) = &self.causes {
            map.insert(
                "causes".into(),
                Value::Array(causes.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map)
    }
}

// ============================================================================
// ErrorResponse
// ============================================================================

/// A response reporting that a message could not be processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    id: Option<MessageId>,
    error: ErrorBody,
}

impl ErrorResponse {
    /// Creates an error response correlated to `request_id`.
    #[must_use]
    pub fn new(request_id: Option<MessageId>, error: &Error, include_debug_info: bool) -> Self {
        Self {
            id: request_id,
            error: ErrorBody::from_error(error, include_debug_info),
        }
    }

    /// Creates an error response to `request`.
    #[must_use]
    pub fn to(request: &Request, error: &Error, include_debug_info: bool) -> Self {
        Self::new(Some(request.id.clone()), error, include_debug_info)
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }

    /// Returns the error description.
    #[inline]
    #[must_use]
    pub fn error(&self) -> &ErrorBody {
        &self.error
    }
}

impl From<ErrorResponse> for Response {
    fn from(response: ErrorResponse) -> Self {
        Response::from_parts(response.id, ResponseKind::Error, response.error.to_value())
    }
}

impl From<ErrorResponse> for Message {
    fn from(response: ErrorResponse) -> Self {
        Response::from(response).into()
    }
}

// ============================================================================
// Tests
// ============================================================================
