//! WS Messaging - Bidirectional request/response messaging over WebSocket.
//!
//! This library layers a small messaging protocol on top of a full-duplex
//! text transport. Either end of a connection can send one-way messages,
//! send a request and await its correlated response, and route inbound
//! messages to handlers by type.
//!
//! # Architecture
//!
//! The library is symmetric:
//!
//! - **Service**: accepts connections from a server and tracks them by ID
//! - **Client**: opens a single outbound connection
//!
//! Both wrap each connection in a [`ConnectionProxy`] bound to one
//! [`Controller`].
//!
//! Key design principles:
//!
//! - One envelope shape: `{ "id", "type", "body" }`
//! - Responses are matched to requests by `id`, at most once
//! - Handler faults become error responses, never dropped connections
//! - A newer connection with the same ID replaces the older one
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ws_messaging::{ConnectionHandle, Message, MessageHandlers, Result, Service, WsServer};
//!
//! async fn echo(connection: ConnectionHandle, message: Message) -> Result<()> {
//!     let response = message.create_response(message.body())?;
//!     connection.send_message(response).await;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Arc::new(WsServer::localhost(8080));
//!
//!     let service = Service::builder(server)
//!         .controller(|connection, _info| {
//!             MessageHandlers::builder()
//!                 .set_handler("echo", move |message| echo(connection.clone(), message))
//!                 .build()
//!         })
//!         .build()?;
//!
//!     service.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     service.stop().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Outbound [`Client`] |
//! | [`connection`] | [`ConnectionProxy`], [`Controller`], [`ProxyConfig`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelope, requests, responses, handler registry |
//! | [`service`] | Connection registry |
//! | [`transport`] | Transport traits and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Outbound connection.
pub mod client;

/// Connection proxy, controller hooks, and configuration.
///
/// - [`ConnectionProxy`] - One connection and its dispatch loop
/// - [`ConnectionHandle`] - Cloneable send/request/close surface
/// - [`Controller`] - Per-connection application hooks
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for messages and connections.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Message envelope and handler registry.
pub mod protocol;

/// Connection registry with duplicate eviction and broadcast.
pub mod service;

/// Transport capability traits and the WebSocket implementation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client
pub use client::Client;

// Connection types
pub use connection::{
    ConnectionHandle, ConnectionProxy, ConnectionState, Controller, DEFAULT_MAX_PENDING_REQUESTS,
    DEFAULT_MAX_QUEUED_MESSAGES, DEFAULT_REQUEST_TIMEOUT, ProxyConfig,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, MessageId};

// Protocol types
pub use protocol::{
    ErrorBody, ErrorResponse, Message, MessageHandlers, MessageHandlersBuilder, Request,
    RequestResult, Response, ResponseKind, message_types,
};

// Service types
pub use service::{BroadcastSummary, ConnectionIdStrategy, Service, ServiceBuilder};

// Transport types
pub use transport::{
    Accepted, Acceptor, ConnectionInfo, Transport, TransportEvent, TransportEvents,
    TransportServer, WsServer, WsTransport,
};
