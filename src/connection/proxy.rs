//! Connection proxy and dispatch loop.
//!
//! Wraps one transport connection: request/response correlation, timeouts,
//! and the open/close/error/message lifecycle of its [`Controller`].
//!
//! # Tasks
//!
//! An opened proxy runs two tokio tasks:
//!
//! - **Dispatch** reads transport events in order, decodes frames, and
//!   resolves responses against the correlation map. Everything else is
//!   queued for the controller.
//! - **Controller** runs the controller hooks one at a time in arrival order.
//!
//! Responses never wait behind a slow handler, so a handler may itself await
//! a request on the same connection. The controller queue holds at most
//! [`ProxyConfig::max_queued_messages`] messages; the dispatch task never
//! blocks on it for inbound messages, so a flooding peer is answered with
//! `MessageQueueFull` errors rather than growing memory.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, MessageId};
use crate::protocol::{ErrorResponse, Message, Request, RequestResult, Response, message_types};
use crate::transport::{Transport, TransportEvent, TransportEvents};

use super::config::ProxyConfig;
use super::controller::Controller;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<MessageId, oneshot::Sender<Result<Response>>>;

/// Lifecycle of a connection.
///
/// `Connecting → Open → Closed`; a closed connection never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, hooks not started yet.
    Connecting,
    /// Dispatching events.
    Open,
    /// Transport closed.
    Closed,
}

/// Work queued for the controller task.
enum ControllerEvent {
    Message(Message),
    Error(Error),
    Close,
}

/// State shared by the proxy, its handles, and its tasks.
struct Shared {
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    correlation: Mutex<CorrelationMap>,
    config: ProxyConfig,
    state: watch::Sender<ConnectionState>,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Cloneable handle to a connection's outward operations.
///
/// Given to the controller factory so controllers can reply, issue requests,
/// and close their own connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.shared.id
    }

    /// Returns the configuration this connection runs with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.shared.config
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.correlation.lock().len()
    }

    /// Best-effort liveness probe. A failing probe reports `false`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self.shared.transport.is_open() {
            Ok(open) => open,
            Err(e) => {
                debug!(connection = %self.id(), error = %e, "Liveness probe failed");
                false
            }
        }
    }

    /// Waits until the connection is closed.
    pub async fn closed(&self) {
        let mut state_rx = self.shared.state.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Sends a message without waiting for a reply.
    ///
    /// Failures are logged and swallowed.
    pub async fn send_message(&self, message: impl Into<Message>) {
        let message = message.into();
        if let Err(e) = self.try_send_message(&message).await {
            warn!(
                connection = %self.id(),
                message_type = %message.message_type(),
                error = %e,
                "Failed to send message"
            );
        }
    }

    /// Encodes and writes one message.
    pub(crate) async fn try_send_message(&self, message: &Message) -> Result<()> {
        let text = message.to_json()?;
        self.send_text(text).await
    }

    /// Writes one pre-encoded frame.
    pub(crate) async fn send_text(&self, text: String) -> Result<()> {
        self.shared.transport.send_text(text).await
    }

    /// Sends a request and waits for its response using the configured
    /// timeout.
    ///
    /// Never fails directly; every failure is folded into the result.
    pub async fn send_request(&self, request: Request) -> RequestResult {
        let request_timeout = self.shared.config.request_timeout;
        self.send_request_with_timeout(request, request_timeout)
            .await
    }

    /// Sends a request and waits for its response with a custom timeout.
    ///
    /// Exactly one of response, timeout, or send failure decides the result.
    /// A response arriving after the timeout is ignored.
    ///
    /// # Failures
    ///
    /// The returned result carries:
    ///
    /// - [`Error::RequestTimeout`] if no response arrived in time
    /// - [`Error::TooManyPendingRequests`] if the pending limit is reached
    /// - [`Error::ConnectionClosed`] if the connection closed first
    /// - the transport error if the send itself failed
    pub async fn send_request_with_timeout(
        &self,
        request: Request,
        request_timeout: Duration,
    ) -> RequestResult {
        let request_id = request.id().clone();

        let text = match Message::from(request.clone()).to_json() {
            Ok(text) => text,
            Err(e) => return RequestResult::failure(request, e),
        };

        let (response_tx, mut response_rx) = oneshot::channel();

        // Register before sending so a fast response cannot be missed
        {
            let mut correlation = self.shared.correlation.lock();

            if self.state() == ConnectionState::Closed {
                return RequestResult::failure(request, Error::ConnectionClosed);
            }

            let max = self.shared.config.max_pending_requests;
            if correlation.len() >= max {
                warn!(
                    connection = %self.id(),
                    pending = correlation.len(),
                    max,
                    "Too many pending requests"
                );
                return RequestResult::failure(
                    request,
                    Error::too_many_pending_requests(correlation.len(), max),
                );
            }

            if correlation.contains_key(&request_id) {
                return RequestResult::failure(
                    request,
                    Error::invalid_message(format!("request {request_id} is already pending")),
                );
            }

            correlation.insert(request_id.clone(), response_tx);
        }

        let mut guard = WaiterGuard {
            correlation: &self.shared.correlation,
            request_id: Some(&request_id),
        };

        if let Err(e) = self.send_text(text).await {
            warn!(connection = %self.id(), %request_id, error = %e, "Failed to send request");
            return RequestResult::failure(request, e);
        }

        trace!(connection = %self.id(), %request_id, "Request sent");

        match timeout(request_timeout, &mut response_rx).await {
            Ok(Ok(outcome)) => {
                guard.disarm();
                match outcome {
                    Ok(response) => RequestResult::success(request, response),
                    Err(e) => RequestResult::failure(request, e),
                }
            }

            Ok(Err(_)) => {
                guard.disarm();
                RequestResult::failure(request, Error::ConnectionClosed)
            }

            Err(_) => {
                let removed = self.shared.correlation.lock().remove(&request_id);
                guard.disarm();

                // The dispatch task removed the waiter first; its response wins
                if removed.is_none()
                    && let Ok(outcome) = response_rx.try_recv()
                {
                    return match outcome {
                        Ok(response) => RequestResult::success(request, response),
                        Err(e) => RequestResult::failure(request, e),
                    };
                }

                debug!(connection = %self.id(), %request_id, "Request timed out");
                RequestResult::failure(
                    request,
                    Error::request_timeout(request_id.clone(), duration_millis(request_timeout)),
                )
            }
        }
    }

    /// Starts a graceful close of the transport.
    ///
    /// Failures are logged and swallowed.
    pub async fn close(&self) {
        if let Err(e) = self.shared.transport.close().await {
            warn!(connection = %self.id(), error = %e, "Failed to close connection");
        }
    }

    /// Hands a response to the request waiting for it.
    ///
    /// Responses for unknown or already resolved requests are dropped.
    fn resolve_response(&self, response: Response) {
        let Some(request_id) = response.id().cloned() else {
            return;
        };

        let waiter = self.shared.correlation.lock().remove(&request_id);
        match waiter {
            Some(response_tx) => {
                if response_tx.send(Ok(response)).is_err() {
                    debug!(connection = %self.id(), %request_id, "Requester gone before response");
                }
            }
            None => {
                debug!(connection = %self.id(), %request_id, "Response for unknown request");
            }
        }
    }

    /// Moves to `Closed` and fails outstanding requests if configured to.
    fn mark_closed(&self) {
        self.shared.state.send_replace(ConnectionState::Closed);

        if !self.shared.config.fail_pending_on_close {
            return;
        }

        let pending: Vec<_> = self.shared.correlation.lock().drain().collect();
        let count = pending.len();

        for (_, response_tx) in pending {
            let _ = response_tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(connection = %self.id(), count, "Failed pending requests on close");
        }
    }

    /// Decodes one inbound frame and routes it.
    async fn dispatch_text(&self, text: &str, controller_tx: &ControllerSender) {
        let message = match Message::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection = %self.id(), error = %e, "Failed to decode inbound message");
                let context = Message::unknown(text);
                let reply = context.create_error_response(&e, self.config().include_debug_info);
                self.send_message(reply).await;
                return;
            }
        };

        match message.try_into_response() {
            Ok(response) => self.resolve_response(response),
            Err(message) => {
                trace!(
                    connection = %self.id(),
                    message_type = %message.message_type(),
                    "Queueing message for controller"
                );
                match controller_tx.try_send(ControllerEvent::Message(message)) {
                    Ok(()) | Err(TrySendError::Closed(_)) => {}
                    Err(TrySendError::Full(event)) => self.reject_queue_full(event).await,
                }
            }
        }
    }

    /// Answers a request the controller queue had no room for.
    async fn reject_queue_full(&self, event: ControllerEvent) {
        let ControllerEvent::Message(message) = event else {
            return;
        };

        let max = self.config().max_queued_messages;
        warn!(
            connection = %self.id(),
            message_type = %message.message_type(),
            max,
            "Controller queue full, dropping message"
        );

        if message.is_request() {
            let reply = message.create_error_response(
                &Error::message_queue_full(max),
                self.config().include_debug_info,
            );
            self.send_message(reply).await;
        }
    }

    /// Runs `on_message`, answering a failure with an error response.
    async fn handle_message(&self, controller: &dyn Controller, message: Message) {
        let request_id = message.id().cloned();
        let message_type = message.message_type().to_string();
        let is_request = message.is_request();

        let Err(e) = run_hook(self.id(), "on_message", controller.on_message(message)).await
        else {
            return;
        };

        // An error reply to a reserved notification could bounce between peers.
        // A request's reply is a correlated response and never reaches a controller.
        if message_types::is_reserved(&message_type) && !is_request {
            debug!(connection = %self.id(), %message_type, "Not answering reserved message type");
            return;
        }

        let reply = ErrorResponse::new(request_id, &e, self.config().include_debug_info);
        self.send_message(reply).await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", self.id())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Removes a waiter whose request future is dropped before it resolves.
struct WaiterGuard<'a> {
    correlation: &'a Mutex<CorrelationMap>,
    request_id: Option<&'a MessageId>,
}

impl WaiterGuard<'_> {
    fn disarm(&mut self) {
        self.request_id = None;
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if let Some(request_id) = self.request_id {
            self.correlation.lock().remove(request_id);
        }
    }
}

// ============================================================================
// ConnectionProxy
// ============================================================================

type ControllerSender = mpsc::Sender<ControllerEvent>;

/// Everything [`ConnectionProxy::open`] consumes.
struct Startup {
    events: TransportEvents,
    controller: Box<dyn Controller>,
}

/// One transport connection bound to one controller.
///
/// # Example
///
/// ```ignore
/// let proxy = ConnectionProxy::new(id, transport, events, config, |connection| {
///     Ok(Echo { connection })
/// })?;
/// proxy.open().await;
///
/// let result = proxy.send_request(Request::new("echo", "hi")?).await;
/// ```
pub struct ConnectionProxy {
    handle: ConnectionHandle,
    startup: Mutex<Option<Startup>>,
}

impl ConnectionProxy {
    /// Creates a proxy and its controller.
    ///
    /// Nothing is dispatched until [`ConnectionProxy::open`].
    ///
    /// # Errors
    ///
    /// - whatever `factory` returns
    /// - [`Error::HandlerPanicked`] if `factory` panics
    pub fn new<C, F>(
        id: ConnectionId,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        config: ProxyConfig,
        factory: F,
    ) -> Result<Self>
    where
        C: Controller,
        F: FnOnce(ConnectionHandle) -> Result<C>,
    {
        let handle = ConnectionHandle {
            shared: Arc::new(Shared {
                id,
                transport,
                correlation: Mutex::new(CorrelationMap::default()),
                config,
                state: watch::Sender::new(ConnectionState::Connecting),
            }),
        };

        let controller = match panic::catch_unwind(AssertUnwindSafe(|| factory(handle.clone()))) {
            Ok(controller) => controller?,
            Err(payload) => return Err(Error::handler_panicked(panic_message(payload.as_ref()))),
        };

        Ok(Self {
            handle,
            startup: Mutex::new(Some(Startup {
                events,
                controller: Box::new(controller),
            })),
        })
    }

    /// Starts dispatching and runs `on_open`.
    ///
    /// Returns once `on_open` has finished. Opening twice is a no-op.
    pub async fn open(&self) {
        let Some(Startup { events, controller }) = self.startup.lock().take() else {
            debug!(connection = %self.id(), "Connection already opened");
            return;
        };

        self.handle.shared.state.send_replace(ConnectionState::Open);
        info!(connection = %self.id(), "Connection opened");

        let capacity = self.handle.config().max_queued_messages;
        let (controller_tx, controller_rx) = mpsc::channel(capacity);
        let (opened_tx, opened_rx) = oneshot::channel();

        tokio::spawn(run_dispatch_loop(self.handle.clone(), events, controller_tx));
        tokio::spawn(run_controller_loop(
            self.handle.clone(),
            controller,
            controller_rx,
            opened_tx,
        ));

        let _ = opened_rx.await;
    }

    /// Returns a cloneable handle to this connection.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.handle.pending_count()
    }

    /// Best-effort liveness probe. A failing probe reports `false`.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Waits until the connection is closed.
    pub async fn closed(&self) {
        self.handle.closed().await;
    }

    /// Sends a message without waiting for a reply. See
    /// [`ConnectionHandle::send_message`].
    pub async fn send_message(&self, message: impl Into<Message>) {
        self.handle.send_message(message).await;
    }

    /// Sends a request with the configured timeout. See
    /// [`ConnectionHandle::send_request`].
    pub async fn send_request(&self, request: Request) -> RequestResult {
        self.handle.send_request(request).await
    }

    /// Sends a request with a custom timeout. See
    /// [`ConnectionHandle::send_request_with_timeout`].
    pub async fn send_request_with_timeout(
        &self,
        request: Request,
        request_timeout: Duration,
    ) -> RequestResult {
        self.handle
            .send_request_with_timeout(request, request_timeout)
            .await
    }

    /// Starts a graceful close. Failures are logged and swallowed.
    pub async fn close(&self) {
        self.handle.close().await;
    }
}

impl fmt::Debug for ConnectionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionProxy").field(&self.handle).finish()
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Reads transport events in order until the transport closes.
async fn run_dispatch_loop(
    handle: ConnectionHandle,
    mut events: TransportEvents,
    controller_tx: ControllerSender,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(text) => {
                trace!(connection = %handle.id(), len = text.len(), "Frame received");
                handle.dispatch_text(&text, &controller_tx).await;
            }

            TransportEvent::Error(e) => {
                warn!(connection = %handle.id(), error = %e, "Transport error");
                let _ = controller_tx.send(ControllerEvent::Error(e)).await;
            }

            TransportEvent::Close => break,
        }
    }

    handle.mark_closed();
    info!(connection = %handle.id(), "Connection closed");

    let _ = controller_tx.send(ControllerEvent::Close).await;
}

/// Runs controller hooks one at a time.
async fn run_controller_loop(
    handle: ConnectionHandle,
    controller: Box<dyn Controller>,
    mut controller_rx: mpsc::Receiver<ControllerEvent>,
    opened_tx: oneshot::Sender<()>,
) {
    let _ = run_hook(handle.id(), "on_open", controller.on_open()).await;
    let _ = opened_tx.send(());

    while let Some(event) = controller_rx.recv().await {
        match event {
            ControllerEvent::Message(message) => {
                handle.handle_message(controller.as_ref(), message).await;
            }

            ControllerEvent::Error(e) => {
                let _ = run_hook(handle.id(), "on_error", controller.on_error(&e)).await;
            }

            ControllerEvent::Close => {
                let _ = run_hook(handle.id(), "on_close", controller.on_close()).await;
                break;
            }
        }
    }

    debug!(connection = %handle.id(), "Controller loop terminated");
}

/// Awaits one controller hook, converting a panic into an error.
async fn run_hook<F>(connection: &ConnectionId, hook: &'static str, future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let outcome = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(Error::handler_panicked(panic_message(payload.as_ref()))),
    };

    if let Err(e) = &outcome {
        warn!(%connection, hook, error = %e, "Controller hook failed");
    }

    outcome
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[inline]
fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
