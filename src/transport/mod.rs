//! Transport layer.
//!
//! The connection proxy and the service depend on a transport only through
//! the capability traits in this module. A tokio-tungstenite implementation
//! is provided for both sides.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Service        │                              │  Client         │
//! │                 │         WebSocket            │                 │
//! │  WsServer       │◄────────────────────────────►│  WsTransport    │
//! │  → WsTransport  │      text frames (JSON)      │                 │
//! │  → Proxy        │                              │  → Proxy        │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `WsServer::start` - Bind and accept TCP connections
//! 2. Upgrade to WebSocket, capture [`ConnectionInfo`]
//! 3. Hand [`Accepted`] to the registered [`Acceptor`]
//! 4. [`TransportEvent`]s flow in order until `Close`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `capability` | `Transport` and `TransportServer` traits |
//! | `info` | Handshake details |
//! | `websocket` | WebSocket transport and I/O loop |
//! | `server` | WebSocket server |

// ============================================================================
// Submodules
// ============================================================================

/// Transport capability traits and events.
pub mod capability;

/// Handshake details for accepted connections.
pub mod info;

/// WebSocket server.
pub mod server;

/// WebSocket transport and I/O loop.
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use capability::{
    Accepted, Acceptor, Transport, TransportEvent, TransportEventSender, TransportEvents,
    TransportServer,
};
pub use info::ConnectionInfo;
pub use server::WsServer;
pub use websocket::WsTransport;
