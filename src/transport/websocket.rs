//! WebSocket transport and I/O tasks.
//!
//! Wraps a tokio-tungstenite stream in the [`Transport`] capability.
//!
//! # I/O Tasks
//!
//! Each socket is split into two halves, each owned by its own tokio task:
//!
//! - **Reader** forwards incoming frames in order as [`TransportEvent`]s
//! - **Writer** writes text frames queued by [`Transport::send_text`] and
//!   handles close requests
//!
//! A write stuck on a full socket never stops the reader, so two peers
//! writing large frames at each other cannot deadlock. Whichever task stops
//! first signals the other through a shared shutdown flag.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::capability::{Transport, TransportEvent, TransportEventSender, TransportEvents};

// ============================================================================
// TransportCommand
// ============================================================================

/// Internal commands for the writer task.
enum TransportCommand {
    /// Write a text frame.
    Send {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Send a close frame and stop.
    Close { ack: oneshot::Sender<Result<()>> },
}

/// Set once either I/O task stops.
type Shutdown = Arc<watch::Sender<bool>>;

// ============================================================================
// WsTransport
// ============================================================================

/// [`Transport`] over a tokio-tungstenite WebSocket stream.
///
/// Works for both accepted server sockets and client sockets.
pub struct WsTransport {
    /// Channel for sending commands to the writer task.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    /// Cleared when the I/O tasks stop.
    open: Arc<AtomicBool>,
}

impl WsTransport {
    /// Takes ownership of `ws_stream` and spawns its reader and writer tasks.
    ///
    /// Returns the outbound handle and the inbound event stream.
    pub fn spawn<S>(ws_stream: WebSocketStream<S>) -> (Arc<Self>, TransportEvents)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let shutdown: Shutdown = Arc::new(watch::Sender::new(false));

        let (ws_write, ws_read) = ws_stream.split();

        tokio::spawn(Self::run_writer(
            ws_write,
            command_rx,
            Arc::clone(&shutdown),
            Arc::clone(&open),
        ));
        tokio::spawn(Self::run_reader(
            ws_read,
            event_tx,
            shutdown,
            Arc::clone(&open),
        ));

        (Arc::new(Self { command_tx, open }), event_rx)
    }

    /// Reader task that owns the inbound half.
    async fn run_reader<S>(
        mut ws_read: SplitStream<WebSocketStream<S>>,
        event_tx: TransportEventSender,
        shutdown: Shutdown,
        open: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut stopped = shutdown.subscribe();

        loop {
            tokio::select! {
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            trace!(len = text.len(), "Text frame received");
                            let _ = event_tx.send(TransportEvent::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(WsMessage::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            let _ = event_tx.send(TransportEvent::Error(Error::WebSocket(e)));
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        Some(Ok(WsMessage::Binary(data))) => {
                            trace!(len = data.len(), "Ignoring binary frame");
                        }

                        // Ping/Pong are answered by tungstenite
                        Some(Ok(_)) => {}
                    }
                }

                _ = stopped.wait_for(|stopped| *stopped) => {
                    debug!("Reader stopped by writer");
                    break;
                }
            }
        }

        open.store(false, Ordering::SeqCst);
        shutdown.send_replace(true);

        let _ = event_tx.send(TransportEvent::Close);
        debug!("Reader task terminated");
    }

    /// Writer task that owns the outbound half.
    async fn run_writer<S>(
        mut ws_write: SplitSink<WebSocketStream<S>, WsMessage>,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        shutdown: Shutdown,
        open: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut stopped = shutdown.subscribe();

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send { text, ack }) => {
                            let result = ws_write
                                .send(WsMessage::Text(text.into()))
                                .await
                                .map_err(Error::from);
                            let _ = ack.send(result);
                        }

                        Some(TransportCommand::Close { ack }) => {
                            debug!("Close command received");
                            let result = ws_write.close().await.map_err(Error::from);
                            let _ = ack.send(result);
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }

                _ = async { let _ = stopped.wait_for(|stopped| *stopped).await; } => break,
            }
        }

        open.store(false, Ordering::SeqCst);
        shutdown.send_replace(true);

        // Flush a pending close reply; errors here only mean it was already sent.
        let _ = ws_write.close().await;

        // Fail commands queued after the writer stopped
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            match command {
                TransportCommand::Send { ack, .. } => {
                    let _ = ack.send(Err(Error::ConnectionClosed));
                }
                TransportCommand::Close { ack } => {
                    let _ = ack.send(Ok(()));
                }
            }
        }

        debug!("Writer task terminated");
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn is_open(&self) -> Result<bool> {
        Ok(self.open.load(Ordering::SeqCst))
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let (ack, ack_rx) = oneshot::channel();
        self.command_tx
            .send(TransportCommand::Send { text, ack })
            .map_err(|_| Error::ConnectionClosed)?;

        ack_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    async fn close(&self) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        if self
            .command_tx
            .send(TransportCommand::Close { ack })
            .is_err()
        {
            // I/O loop already gone
            return Ok(());
        }

        ack_rx.await.unwrap_or(Ok(()))
    }
}

// ============================================================================
// Tests
// ============================================================================
