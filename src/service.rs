//! Connection registry.
//!
//! Accepts inbound connections from a [`TransportServer`], binds each to a
//! controller, and tracks the live ones by [`ConnectionId`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Service                   │
//! │  ┌─────────────────────────────────┐    │
//! │  │ "alice" → ConnectionProxy       │    │
//! │  │ "bob"   → ConnectionProxy       │    │
//! │  │ uuid    → ConnectionProxy       │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Duplicate IDs
//!
//! The latest connection wins. When an accepted connection maps to an ID that
//! is already tracked, the new proxy replaces the old one in a single write
//! and the old one is closed in the background.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};

use crate::connection::proxy::panic_message;
use crate::connection::{ConnectionHandle, ConnectionProxy, Controller, ProxyConfig};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Message;
use crate::transport::{Accepted, ConnectionInfo, Transport, TransportEvents, TransportServer};

// ============================================================================
// Types
// ============================================================================

/// Derives the registry key of an accepted connection.
pub type ConnectionIdStrategy = Arc<dyn Fn(&ConnectionInfo) -> Result<ConnectionId> + Send + Sync>;

/// Creates the controller of an accepted connection.
type ControllerFactory =
    Arc<dyn Fn(ConnectionHandle, &ConnectionInfo) -> Result<Box<dyn Controller>> + Send + Sync>;

/// Snapshot of tracked connections.
pub type Connections = FxHashMap<ConnectionId, Arc<ConnectionProxy>>;

/// Default strategy: a fresh random ID per connection.
fn generate_connection_id(_info: &ConnectionInfo) -> Result<ConnectionId> {
    Ok(ConnectionId::generate())
}

// ============================================================================
// BroadcastSummary
// ============================================================================

/// Outcome of [`Service::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Connections a send was attempted on.
    pub attempted: usize,
    /// Sends that failed.
    pub failed: usize,
}

impl BroadcastSummary {
    /// Sends that succeeded.
    #[inline]
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.attempted - self.failed
    }
}

// ============================================================================
// Service
// ============================================================================

/// Registry of live connections accepted from one server.
///
/// # Example
///
/// ```ignore
/// let server = Arc::new(WsServer::localhost(8080));
/// let service = Service::builder(server)
///     .connection_id(|info| ConnectionId::new(info.cookie("client").unwrap_or_default()))
///     .controller(|connection, _info| {
///         MessageHandlers::builder()
///             .set_handler("echo", move |message: Message| {
///                 let connection = connection.clone();
///                 async move {
///                     connection.send_message(message.create_response(message.body())?).await;
///                     Ok(())
///                 }
///             })
///             .build()
///     })
///     .build()?;
///
/// service.start().await?;
/// ```
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    server: Arc<dyn TransportServer>,
    config: ProxyConfig,
    connection_id: ConnectionIdStrategy,
    controller: ControllerFactory,
    /// Live connections by ID.
    connections: RwLock<Connections>,
    running: AtomicBool,
}

// ============================================================================
// Service - Constructor
// ============================================================================

impl Service {
    /// Creates a builder for a service accepting from `server`.
    #[inline]
    #[must_use]
    pub fn builder(server: Arc<dyn TransportServer>) -> ServiceBuilder {
        ServiceBuilder {
            server,
            config: ProxyConfig::default(),
            connection_id: None,
            controller: None,
        }
    }
}

// ============================================================================
// Service - Public API
// ============================================================================

impl Service {
    /// Starts the underlying server. Starting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the server's start error.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Service already running");
            return Ok(());
        }

        if let Err(e) = self.inner.server.start().await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!("Service started");
        Ok(())
    }

    /// Stops the server and closes every tracked connection. Stopping twice
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the server's stop error. The service then keeps running with
    /// its connections open, and `stop` can be retried.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("Service already stopped");
            return Ok(());
        }

        if let Err(e) = self.inner.server.stop().await {
            warn!(error = %e, "Failed to stop server");
            self.inner.running.store(true, Ordering::SeqCst);
            return Err(e);
        }

        let connections: Vec<_> = self.inner.connections.read().values().cloned().collect();
        join_all(connections.iter().map(|proxy| proxy.close())).await;

        info!(closed = connections.len(), "Service stopped");
        Ok(())
    }

    /// Returns `true` between [`Service::start`] and [`Service::stop`].
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Returns the configuration given to every connection.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// Returns a point-in-time copy of the tracked connections.
    #[must_use]
    pub fn connections(&self) -> Connections {
        self.inner.connections.read().clone()
    }

    /// Returns the connection tracked under `id`.
    #[must_use]
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<ConnectionProxy>> {
        self.inner.connections.read().get(id).cloned()
    }

    /// Returns the number of tracked connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Sends `message` to every tracked connection.
    ///
    /// All sends are attempted; individual failures are logged and counted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the message cannot be encoded.
    pub async fn broadcast(&self, message: impl Into<Message>) -> Result<BroadcastSummary> {
        let message = message.into();
        let text = message.to_json()?;

        let targets: Vec<_> = self.inner.connections.read().values().cloned().collect();
        let outcomes = join_all(targets.iter().map(|proxy| {
            let text = text.clone();
            async move { (proxy, proxy.handle().send_text(text).await) }
        }))
        .await;

        let mut summary = BroadcastSummary {
            attempted: outcomes.len(),
            failed: 0,
        };

        for (proxy, outcome) in outcomes {
            if let Err(e) = outcome {
                summary.failed += 1;
                warn!(connection = %proxy.id(), error = %e, "Broadcast send failed");
            }
        }

        debug!(
            message_type = %message.message_type(),
            attempted = summary.attempted,
            failed = summary.failed,
            "Broadcast complete"
        );
        Ok(summary)
    }
}

// ============================================================================
// ServiceInner - Accept
// ============================================================================

impl ServiceInner {
    /// Registers and opens one accepted connection.
    ///
    /// A connection that cannot be bound is closed and never registered.
    async fn accept(self: &Arc<Self>, accepted: Accepted) -> Result<Arc<ConnectionProxy>> {
        let Accepted {
            transport,
            events,
            info,
        } = accepted;

        let proxy = match self.create_proxy(Arc::clone(&transport), events, &info) {
            Ok(proxy) => Arc::new(proxy),
            Err(e) => {
                error!(remote = ?info.remote_endpoint, error = %e, "Rejected connection");
                if let Err(close_err) = transport.close().await {
                    warn!(error = %close_err, "Failed to close rejected connection");
                }
                return Err(e);
            }
        };

        let id = proxy.id().clone();
        let previous = self
            .connections
            .write()
            .insert(id.clone(), Arc::clone(&proxy));

        if let Some(previous) = previous {
            info!(connection = %id, "Closing duplicate connection");
            tokio::spawn(async move {
                previous.close().await;
            });
        }

        let registry = Arc::downgrade(self);
        let watched = Arc::clone(&proxy);
        tokio::spawn(async move {
            watched.closed().await;
            if let Some(registry) = registry.upgrade() {
                registry.remove_if_current(&watched);
            }
        });

        debug!(connection = %id, remote = ?info.remote_endpoint, "Connection registered");
        proxy.open().await;

        Ok(proxy)
    }

    /// Derives the ID and builds the proxy and controller.
    fn create_proxy(
        &self,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        info: &ConnectionInfo,
    ) -> Result<ConnectionProxy> {
        let id = match panic::catch_unwind(AssertUnwindSafe(|| (self.connection_id)(info))) {
            Ok(id) => id?,
            Err(payload) => return Err(Error::handler_panicked(panic_message(payload.as_ref()))),
        };

        let factory = Arc::clone(&self.controller);
        ConnectionProxy::new(id, transport, events, self.config.clone(), |connection| {
            factory(connection, info)
        })
    }

    /// Drops the entry for `proxy` unless it was already replaced.
    fn remove_if_current(&self, proxy: &Arc<ConnectionProxy>) {
        let mut connections = self.connections.write();
        let is_current = connections
            .get(proxy.id())
            .is_some_and(|current| Arc::ptr_eq(current, proxy));

        if is_current {
            connections.remove(proxy.id());
            debug!(connection = %proxy.id(), "Connection unregistered");
        }
    }
}

// ============================================================================
// ServiceBuilder
// ============================================================================

/// Builder for [`Service`].
pub struct ServiceBuilder {
    server: Arc<dyn TransportServer>,
    config: ProxyConfig,
    connection_id: Option<ConnectionIdStrategy>,
    controller: Option<ControllerFactory>,
}

impl ServiceBuilder {
    /// Sets the configuration given to every connection.
    #[must_use]
    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how connection IDs are derived from handshake details.
    ///
    /// Defaults to a random UUID per connection.
    #[must_use]
    pub fn connection_id<F>(mut self, strategy: F) -> Self
    where
        F: Fn(&ConnectionInfo) -> Result<ConnectionId> + Send + Sync + 'static,
    {
        self.connection_id = Some(Arc::new(strategy));
        self
    }

    /// Sets the controller factory, called once per accepted connection.
    #[must_use]
    pub fn controller<C, F>(mut self, factory: F) -> Self
    where
        C: Controller,
        F: Fn(ConnectionHandle, &ConnectionInfo) -> Result<C> + Send + Sync + 'static,
    {
        self.controller = Some(Arc::new(
            move |connection: ConnectionHandle, info: &ConnectionInfo| {
                factory(connection, info).map(|controller| Box::new(controller) as Box<dyn Controller>)
            },
        ));
        self
    }

    /// Builds the service and registers it with the server.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no controller factory was set
    /// - [`Error::Config`] if the configuration is invalid
    pub fn build(self) -> Result<Service> {
        self.config.validate()?;

        let controller = self
            .controller
            .ok_or_else(|| Error::config("service has no controller factory"))?;
        let connection_id = self
            .connection_id
            .unwrap_or_else(|| Arc::new(generate_connection_id) as ConnectionIdStrategy);

        let inner = Arc::new(ServiceInner {
            server: self.server,
            config: self.config,
            connection_id,
            controller,
            connections: RwLock::new(Connections::default()),
            running: AtomicBool::new(false),
        });

        let registry: Weak<ServiceInner> = Arc::downgrade(&inner);
        inner.server.set_acceptor(Arc::new(move |accepted: Accepted| {
            let Some(registry) = registry.upgrade() else {
                debug!("Service dropped, closing accepted connection");
                tokio::spawn(async move {
                    let _ = accepted.transport.close().await;
                });
                return;
            };

            tokio::spawn(async move {
                // Failures are logged by accept
                let _ = registry.accept(accepted).await;
            });
        }));

        Ok(Service { inner })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::protocol::MessageHandlers;
    use crate::transport::Acceptor;
    use crate::transport::mock::MockTransport;

    #[derive(Default)]
    struct MockServer {
        acceptor: RwLock<Option<Acceptor>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: AtomicBool,
        fail_stop: AtomicBool,
    }

    impl MockServer {
        fn connect(&self, info: ConnectionInfo) -> Arc<MockTransport> {
            let (transport, events) = MockTransport::new();
            let acceptor = self.acceptor.read().clone().expect("acceptor registered");
            acceptor(Accepted {
                transport: Arc::clone(&transport) as Arc<dyn Transport>,
                events,
                info,
            });
            transport
        }
    }

    #[async_trait]
    impl TransportServer for MockServer {
        fn set_acceptor(&self, acceptor: Acceptor) {
            *self.acceptor.write() = Some(acceptor);
        }

        async fn start(&self) -> Result<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(Error::connection("address in use"));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(Error::connection("listener stuck"));
            }
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Reports the ID and path of every opened connection.
    struct Opened {
        id: ConnectionId,
        path: Option<String>,
        opened: mpsc::UnboundedSender<(ConnectionId, Option<String>)>,
    }

    #[async_trait]
    impl Controller for Opened {
        async fn on_open(&self) -> Result<()> {
            let _ = self.opened.send((self.id.clone(), self.path.clone()));
            Ok(())
        }

        async fn on_message(&self, _message: Message) -> Result<()> {
            Ok(())
        }
    }

    fn client_id(info: &ConnectionInfo) -> Result<ConnectionId> {
        ConnectionId::new(info.header("x-client-id").unwrap_or_default())
    }

    fn service_with(server: Arc<MockServer>) -> Service {
        Service::builder(server)
            .connection_id(client_id)
            .controller(|_connection, _info| MessageHandlers::builder().build())
            .build()
            .expect("service")
    }

    fn accepted(info: ConnectionInfo) -> (Accepted, Arc<MockTransport>) {
        let (transport, events) = MockTransport::new();
        let accepted = Accepted {
            transport: Arc::clone(&transport) as Arc<dyn Transport>,
            events,
            info,
        };
        (accepted, transport)
    }

    fn client(name: &str) -> ConnectionInfo {
        ConnectionInfo::new()
            .with_remote_endpoint("127.0.0.1:40000")
            .with_header("X-Client-Id", name)
    }

    async fn wait_until_empty(service: &Service) {
        timeout(Duration::from_secs(5), async {
            while service.connection_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("registry emptied");
    }

    #[test]
    fn test_build_requires_controller() {
        let result = Service::builder(Arc::new(MockServer::default())).build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_validates_config() {
        let result = Service::builder(Arc::new(MockServer::default()))
            .config(ProxyConfig::default().with_request_timeout(Duration::ZERO))
            .controller(|_connection, _info| MessageHandlers::builder().build())
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let server = Arc::new(MockServer::default());
        let service = service_with(Arc::clone(&server));

        service.start().await.expect("start");
        service.start().await.expect("second start");
        assert!(service.is_running());
        assert_eq!(server.starts.load(Ordering::SeqCst), 1);

        service.stop().await.expect("stop");
        service.stop().await.expect("second stop");
        assert!(!service.is_running());
        assert_eq!(server.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried() {
        let server = Arc::new(MockServer::default());
        server.fail_start.store(true, Ordering::SeqCst);
        let service = service_with(Arc::clone(&server));

        assert!(service.start().await.is_err());
        assert!(!service.is_running());

        server.fail_start.store(false, Ordering::SeqCst);
        service.start().await.expect("retry");
        assert!(service.is_running());
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_connections_and_can_be_retried() {
        let server = Arc::new(MockServer::default());
        let service = service_with(Arc::clone(&server));
        service.start().await.expect("start");

        let (accepted, transport) = accepted(client("a"));
        service.inner.accept(accepted).await.expect("accepted");

        server.fail_stop.store(true, Ordering::SeqCst);
        assert!(service.stop().await.is_err());
        assert!(service.is_running());
        assert_eq!(service.connection_count(), 1);
        assert_eq!(transport.close_count(), 0);

        server.fail_stop.store(false, Ordering::SeqCst);
        service.stop().await.expect("retry");
        assert!(!service.is_running());
        assert_eq!(server.stops.load(Ordering::SeqCst), 1);
        assert_eq!(transport.close_count(), 1);
        wait_until_empty(&service).await;
    }

    #[tokio::test]
    async fn test_server_acceptor_registers_connection() {
        let server = Arc::new(MockServer::default());
        let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();
        let service = Service::builder(Arc::clone(&server) as Arc<dyn TransportServer>)
            .controller(move |connection, info| {
                Ok(Opened {
                    id: connection.id().clone(),
                    path: info.path.clone(),
                    opened: opened_tx.clone(),
                })
            })
            .build()
            .expect("service");
        service.start().await.expect("start");

        server.connect(ConnectionInfo::new().with_path("/chat"));

        let (id, path) = timeout(Duration::from_secs(5), opened_rx.recv())
            .await
            .expect("opened in time")
            .expect("opened");
        assert_eq!(path.as_deref(), Some("/chat"));
        assert_eq!(service.connection_count(), 1);
        assert!(service.connection(&id).is_some());
    }

    #[tokio::test]
    async fn test_duplicate_id_evicts_previous() {
        let service = service_with(Arc::new(MockServer::default()));

        let (first_accepted, first_transport) = accepted(client("alice"));
        let first = service.inner.accept(first_accepted).await.expect("first");

        let (second_accepted, second_transport) = accepted(client("alice"));
        let second = service.inner.accept(second_accepted).await.expect("second");

        let id = ConnectionId::new("alice").expect("id");
        assert_eq!(service.connection_count(), 1);
        let current = service.connection(&id).expect("tracked");
        assert!(Arc::ptr_eq(&current, &second));

        first_transport.wait_closed().await;
        first.closed().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // The evicted proxy must not unregister its replacement
        assert_eq!(service.connection_count(), 1);
        assert!(Arc::ptr_eq(
            &service.connection(&id).expect("tracked"),
            &second
        ));
        assert_eq!(second_transport.close_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_is_unregistered() {
        let service = service_with(Arc::new(MockServer::default()));

        let (accepted, transport) = accepted(client("bob"));
        let proxy = service.inner.accept(accepted).await.expect("accepted");
        assert_eq!(service.connection_count(), 1);

        transport.push_close();
        proxy.closed().await;
        wait_until_empty(&service).await;
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected() {
        let service = service_with(Arc::new(MockServer::default()));

        let (accepted, transport) = accepted(client("   "));
        let err = service.inner.accept(accepted).await.unwrap_err();

        assert!(matches!(err, Error::InvalidConnectionId { .. }));
        assert_eq!(transport.close_count(), 1);
        assert_eq!(service.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_controller_failure_is_rejected() {
        let service = Service::builder(Arc::new(MockServer::default()))
            .controller(|_connection, _info| -> Result<MessageHandlers> {
                Err(Error::handler("no controller today"))
            })
            .build()
            .expect("service");

        let (accepted, transport) = accepted(ConnectionInfo::new());
        let err = service.inner.accept(accepted).await.unwrap_err();

        assert!(matches!(err, Error::Handler { .. }));
        assert_eq!(transport.close_count(), 1);
        assert_eq!(service.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_id_strategy_panic_is_rejected() {
        let service = Service::builder(Arc::new(MockServer::default()))
            .connection_id(|_info| panic!("strategy exploded"))
            .controller(|_connection, _info| MessageHandlers::builder().build())
            .build()
            .expect("service");

        let (accepted, transport) = accepted(ConnectionInfo::new());
        let err = service.inner.accept(accepted).await.unwrap_err();

        assert!(matches!(err, Error::HandlerPanicked { .. }));
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_failure() {
        let service = service_with(Arc::new(MockServer::default()));

        let mut transports = Vec::new();
        for name in ["a", "b", "c"] {
            let (accepted, transport) = accepted(client(name));
            service.inner.accept(accepted).await.expect("accepted");
            transports.push(transport);
        }
        transports[1].fail_sends(true);

        let summary = service
            .broadcast(Message::notification("news", "hello").expect("valid"))
            .await
            .expect("broadcast");

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.delivered(), 2);
        for index in [0, 2] {
            let sent = transports[index].sent_messages();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].message_type(), "news");
        }
        assert!(transports[1].sent().is_empty());
    }

    #[tokio::test]
    async fn test_connections_is_a_snapshot() {
        let service = service_with(Arc::new(MockServer::default()));

        let (accepted_a, transport_a) = accepted(client("a"));
        let proxy_a = service.inner.accept(accepted_a).await.expect("a");
        let (accepted_b, _transport_b) = accepted(client("b"));
        service.inner.accept(accepted_b).await.expect("b");

        let snapshot = service.connections();
        assert_eq!(snapshot.len(), 2);

        transport_a.push_close();
        proxy_a.closed().await;
        timeout(Duration::from_secs(5), async {
            while service.connection_count() > 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("a unregistered");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(service.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_connections() {
        let service = service_with(Arc::new(MockServer::default()));
        service.start().await.expect("start");

        let (accepted, transport) = accepted(client("a"));
        service.inner.accept(accepted).await.expect("accepted");

        service.stop().await.expect("stop");
        assert_eq!(transport.close_count(), 1);
        wait_until_empty(&service).await;
    }
}
