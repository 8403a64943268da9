//! WebSocket server.
//!
//! Implements [`TransportServer`] on a TCP listener with tokio-tungstenite.
//!
//! # Connection Flow
//!
//! 1. [`TransportServer::start`] binds the listener and spawns the accept loop
//! 2. Each TCP connection is upgraded to WebSocket on its own task
//! 3. The upgrade request is captured as [`ConnectionInfo`]
//! 4. The registered [`Acceptor`] receives the transport and its events
//! 5. [`TransportServer::stop`] ends the accept loop

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse as HandshakeError, Request as HandshakeRequest,
    Response as HandshakeResponse,
};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::capability::{Accepted, Acceptor, TransportServer};
use super::info::ConnectionInfo;
use super::websocket::WsTransport;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address for the WebSocket server (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ============================================================================
// WsServer
// ============================================================================

/// A WebSocket server producing [`Accepted`] connections.
///
/// # Example
///
/// ```ignore
/// let server = Arc::new(WsServer::localhost(0));
/// server.set_acceptor(Arc::new(|accepted| { /* ... */ }));
/// server.start().await?;
/// println!("listening on {}", server.ws_url().unwrap());
/// ```
pub struct WsServer {
    /// Requested bind address.
    addr: SocketAddr,
    /// Callback for accepted connections.
    acceptor: RwLock<Option<Acceptor>>,
    /// Present while the accept loop runs.
    running: Mutex<Option<RunningServer>>,
}

/// State of a started server.
struct RunningServer {
    /// Address actually bound (resolves port 0).
    local_addr: SocketAddr,
    /// Signals the accept loop to stop.
    shutdown_tx: oneshot::Sender<()>,
    /// Accept loop task.
    task: JoinHandle<()>,
}

// ============================================================================
// WsServer - Constructor
// ============================================================================

impl WsServer {
    /// Creates a server that will bind to `addr` when started.
    ///
    /// Use port 0 to let the OS assign a random available port.
    #[inline]
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            acceptor: RwLock::new(None),
            running: Mutex::new(None),
        }
    }

    /// Creates a server bound to localhost on `port`.
    #[inline]
    #[must_use]
    pub fn localhost(port: u16) -> Self {
        Self::new(SocketAddr::new(DEFAULT_BIND_IP, port))
    }
}

// ============================================================================
// WsServer - Public API
// ============================================================================

impl WsServer {
    /// Returns the bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    /// Returns the WebSocket URL while running.
    ///
    /// Format: `ws://{ip}:{port}`
    #[must_use]
    pub fn ws_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("ws://{addr}"))
    }

    /// Returns `true` while the accept loop runs.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

// ============================================================================
// WsServer - TransportServer
// ============================================================================

#[async_trait]
impl TransportServer for WsServer {
    fn set_acceptor(&self, acceptor: Acceptor) {
        *self.acceptor.write() = Some(acceptor);
    }

    async fn start(&self) -> Result<()> {
        if self.is_running() {
            debug!("WebSocket server already running");
            return Ok(());
        }

        let acceptor = self
            .acceptor
            .read()
            .clone()
            .ok_or_else(|| Error::config("WebSocket server started without an acceptor"))?;

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        let mut running = self.running.lock();
        if running.is_some() {
            // Lost a start race; the other listener wins.
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(Self::accept_loop(listener, acceptor, shutdown_rx));

        *running = Some(RunningServer {
            local_addr,
            shutdown_tx,
            task,
        });

        info!(%local_addr, "WebSocket server started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().take() else {
            debug!("WebSocket server already stopped");
            return Ok(());
        };

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.task.await {
            warn!(error = %e, "Accept loop did not shut down cleanly");
        }

        info!(local_addr = %running.local_addr, "WebSocket server stopped");
        Ok(())
    }
}

// ============================================================================
// WsServer - Accept Loop
// ============================================================================

impl WsServer {
    /// Background task that accepts new connections.
    async fn accept_loop(
        listener: TcpListener,
        acceptor: Acceptor,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Accept loop shutting down");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let acceptor = Arc::clone(&acceptor);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, addr, acceptor).await {
                                    warn!(error = %e, %addr, "Connection handling failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    }
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades a single TCP connection and hands it to the acceptor.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        acceptor: Acceptor,
    ) -> Result<()> {
        debug!(%addr, "New TCP connection");

        let mut info = None;
        let ws_stream = accept_hdr_async(
            stream,
            |request: &HandshakeRequest,
             response: HandshakeResponse|
             -> std::result::Result<HandshakeResponse, HandshakeError> {
                info = Some(ConnectionInfo::from_handshake(addr.to_string(), request));
                Ok(response)
            },
        )
        .await
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let info =
            info.unwrap_or_else(|| ConnectionInfo::new().with_remote_endpoint(addr.to_string()));

        info!(%addr, path = ?info.path, "WebSocket connection established");

        let (transport, events) = WsTransport::spawn(ws_stream);
        acceptor(Accepted {
            transport,
            events,
            info,
        });

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
