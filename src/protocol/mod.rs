//! WebSocket protocol message types.
//!
//! This module defines the envelope exchanged between the two ends of a
//! connection and the typed views built on top of it.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | either | Expects a correlated response |
//! | `Response` | either | Successful answer to a request |
//! | `ErrorResponse` | either | Failed answer to a request |
//! | notification | either | One-way message, no `id` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Envelope, reserved types, classification, JSON codec |
//! | `response` | Request, Response, and ErrorResponse types |
//! | `result` | Outcome of a correlated request |
//! | `handlers` | Message type to handler registry |

// ============================================================================
// Submodules
// ============================================================================

/// Message handler registry.
pub mod handlers;

/// Message envelope and classification.
pub mod message;

/// Request and Response message types.
pub mod response;

/// Outcome of a correlated request.
pub mod result;

// ============================================================================
// Re-exports
// ============================================================================

pub use handlers::{Handler, HandlerFuture, MessageHandlers, MessageHandlersBuilder};
pub use message::{Message, message_types};
pub use response::{ErrorBody, ErrorResponse, Request, Response, ResponseKind};
pub use result::RequestResult;
