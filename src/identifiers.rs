//! Type-safe identifiers.
//!
//! Newtype wrappers keep message correlation IDs and connection IDs from
//! being mixed up at compile time.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`MessageId`] | Correlates a request with its response |
//! | [`ConnectionId`] | Registry key for a tracked connection |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// MessageId
// ============================================================================

/// Correlation ID carried in the envelope `id` field.
///
/// Peers may send any string, so this is not restricted to UUIDs.
/// Locally generated IDs are random UUID v4 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps an existing ID.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Key of a connection in the service registry.
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a connection ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConnectionId`] if `id` is empty or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::invalid_connection_id("connection id must not be empty"));
        }
        Ok(Self(id))
    }

    /// Generates a new random connection ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ConnectionId {
    type Error = Error;

    fn try_from(id: &str) -> Result<Self> {
        Self::new(id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_generate_unique() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_message_id_serializes_as_plain_string() {
        let id = MessageId::new("abc");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"abc\"");
    }

    #[test]
    fn test_connection_id_rejects_empty() {
        assert!(matches!(
            ConnectionId::new(""),
            Err(Error::InvalidConnectionId { .. })
        ));
        assert!(ConnectionId::new("   ").is_err());
        assert_eq!(ConnectionId::new("client-1").expect("valid").as_str(), "client-1");
    }
}
