//! Transport capability interfaces.
//!
//! The connection proxy and the service only see a transport through these
//! traits, so any full-duplex text transport can sit underneath.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::info::ConnectionInfo;

// ============================================================================
// TransportEvent
// ============================================================================

/// Inbound event raised by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// The transport failed. A [`TransportEvent::Close`] usually follows.
    Error(Error),
    /// The transport closed. No further events follow.
    Close,
}

/// Ordered stream of events for one connection.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of [`TransportEvents`].
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// One full-duplex, message-oriented connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// Implementation-specific; callers treat errors as "closed".
    fn is_open(&self) -> Result<bool>;

    /// Writes one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be written.
    async fn send_text(&self, text: String) -> Result<()>;

    /// Starts a graceful close.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake could not be sent.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// TransportServer
// ============================================================================

/// A newly accepted inbound connection.
pub struct Accepted {
    /// Outbound half.
    pub transport: Arc<dyn Transport>,
    /// Inbound events, in arrival order.
    pub events: TransportEvents,
    /// Handshake details.
    pub info: ConnectionInfo,
}

impl fmt::Debug for Accepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepted")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Callback invoked once per accepted connection.
pub type Acceptor = Arc<dyn Fn(Accepted) + Send + Sync>;

/// A listener producing inbound connections.
#[async_trait]
pub trait TransportServer: Send + Sync + 'static {
    /// Registers the callback for accepted connections.
    ///
    /// Must be called before [`TransportServer::start`].
    fn set_acceptor(&self, acceptor: Acceptor);

    /// Starts accepting. Starting a running server is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no acceptor is registered
    /// - [`Error::Io`] if the listener cannot be bound
    async fn start(&self) -> Result<()>;

    /// Stops accepting. Stopping a stopped server is a no-op.
    ///
    /// # Errors
    ///
    /// Implementation-specific.
    async fn stop(&self) -> Result<()>;
}
