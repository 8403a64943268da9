//! Connection proxy layer.
//!
//! One [`ConnectionProxy`] wraps one transport connection and binds it to
//! one [`Controller`].
//!
//! # Request Flow
//!
//! ```text
//! send_request ──► correlation map ──► transport
//!                        ▲
//!                        │ matching id
//! transport ──► dispatch ┴─► controller.on_message ──► reply
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | `ProxyConfig` |
//! | `controller` | `Controller` hooks |
//! | `proxy` | Proxy, handle, and dispatch loop |

// ============================================================================
// Submodules
// ============================================================================

/// Per-connection configuration.
pub mod config;

/// Application hooks bound to one connection.
pub mod controller;

/// Connection proxy and dispatch loop.
pub mod proxy;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{
    DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_MAX_QUEUED_MESSAGES, DEFAULT_REQUEST_TIMEOUT, ProxyConfig,
};
pub use controller::Controller;
pub use proxy::{ConnectionHandle, ConnectionProxy, ConnectionState};
