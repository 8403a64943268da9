//! Client-side connection.
//!
//! Opens a WebSocket to a server and wraps it in the same proxy the service
//! uses, so both ends share one request/response surface.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::connect("ws://127.0.0.1:8080/chat", ProxyConfig::default(), |_connection| {
//!     MessageHandlers::builder().build()
//! })
//! .await?;
//!
//! let result = client.send_request(Request::new("echo", "hi")?).await;
//! assert!(result.is_successful());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

use crate::connection::{ConnectionHandle, ConnectionProxy, ConnectionState, Controller, ProxyConfig};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Message, Request, RequestResult};
use crate::transport::{Transport, WsTransport};

// ============================================================================
// Client
// ============================================================================

/// An outbound connection bound to a controller.
#[derive(Debug)]
pub struct Client {
    proxy: ConnectionProxy,
}

impl Client {
    /// Connects to `url` and opens the connection.
    ///
    /// `factory` builds the controller for inbound messages. `on_open` has
    /// run when this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration or URL is invalid
    /// - [`Error::Connection`] if the connection or handshake fails
    /// - whatever `factory` returns
    pub async fn connect<C, F>(url: &str, config: ProxyConfig, factory: F) -> Result<Self>
    where
        C: Controller,
        F: FnOnce(ConnectionHandle) -> Result<C> + Send,
    {
        config.validate()?;

        let url = Url::parse(url).map_err(|e| Error::config(format!("invalid url '{url}': {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "unsupported url scheme '{}', expected ws or wss",
                url.scheme()
            )));
        }

        debug!(%url, "Connecting");
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {url}: {e}")))?;

        let (transport, events) = WsTransport::spawn(ws_stream);
        let proxy = match ConnectionProxy::new(
            ConnectionId::generate(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            events,
            config,
            factory,
        ) {
            Ok(proxy) => proxy,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        proxy.open().await;
        info!(connection = %proxy.id(), %url, "Client connected");

        Ok(Self { proxy })
    }

    /// Returns a cloneable handle to this connection.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        self.proxy.handle()
    }

    /// Returns the local connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.proxy.id()
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.proxy.state()
    }

    /// Best-effort liveness probe.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.proxy.is_open()
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.proxy.pending_count()
    }

    /// Sends a message without waiting for a reply.
    pub async fn send_message(&self, message: impl Into<Message>) {
        self.proxy.send_message(message).await;
    }

    /// Sends a request with the configured timeout.
    pub async fn send_request(&self, request: Request) -> RequestResult {
        self.proxy.send_request(request).await
    }

    /// Sends a request with a custom timeout.
    pub async fn send_request_with_timeout(
        &self,
        request: Request,
        request_timeout: Duration,
    ) -> RequestResult {
        self.proxy
            .send_request_with_timeout(request, request_timeout)
            .await
    }

    /// Closes the connection. Failures are logged and swallowed.
    pub async fn close(&self) {
        self.proxy.close().await;
    }

    /// Waits until the connection is closed.
    pub async fn closed(&self) {
        self.proxy.closed().await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::Context;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;
    use tokio::time::{sleep, timeout};

    use crate::protocol::MessageHandlers;
    use crate::service::Service;
    use crate::transport::{TransportServer, WsServer};

    const SCENARIO_TIMEOUT: Duration = Duration::from_secs(5);

    async fn echo(connection: ConnectionHandle, message: Message) -> Result<()> {
        let response = message.create_response(message.body())?;
        connection.send_message(response).await;
        Ok(())
    }

    fn echo_handlers(connection: ConnectionHandle) -> Result<MessageHandlers> {
        MessageHandlers::builder()
            .set_handler("echo", move |message| echo(connection.clone(), message))
            .set_handler("silent", |_message| async { Ok(()) })
            .build()
    }

    async fn start_service() -> (Service, String) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let server = Arc::new(WsServer::localhost(0));
        let service = Service::builder(Arc::clone(&server) as Arc<dyn TransportServer>)
            .controller(|connection, _info| echo_handlers(connection))
            .build()
            .expect("service");
        service.start().await.expect("start");

        let url = server.ws_url().expect("url");
        (service, url)
    }

    async fn wait_for_count(service: &Service, count: usize) {
        timeout(SCENARIO_TIMEOUT, async {
            while service.connection_count() != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count reached");
    }

    #[tokio::test]
    async fn test_echo_round_trip() -> anyhow::Result<()> {
        let (service, url) = start_service().await;
        let client = Client::connect(&url, ProxyConfig::default(), |_connection| {
            MessageHandlers::builder().build()
        })
        .await?;

        let result = client
            .send_request_with_timeout(Request::new("echo", "hi")?, SCENARIO_TIMEOUT)
            .await;

        assert!(result.is_successful());
        let response = result.response().context("echo response")?;
        assert_eq!(response.body(), &json!("hi"));
        assert_eq!(client.pending_count(), 0);

        client.close().await;
        service.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_handler_returns_error_response() {
        let (service, url) = start_service().await;
        let client = Client::connect(&url, ProxyConfig::default(), |_connection| {
            MessageHandlers::builder().build()
        })
        .await
        .expect("connect");

        let result = client
            .send_request_with_timeout(Request::new("missing", ()).expect("request"), SCENARIO_TIMEOUT)
            .await;

        assert!(!result.is_successful());
        let response = result.response().expect("response");
        assert!(response.is_error());
        let body = response.error_body().expect("error body");
        assert!(body.message.contains("missing"));

        service.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (service, url) = start_service().await;
        let client = Client::connect(&url, ProxyConfig::default(), |_connection| {
            MessageHandlers::builder().build()
        })
        .await
        .expect("connect");

        let result = client
            .send_request_with_timeout(
                Request::new("silent", ()).expect("request"),
                Duration::from_millis(200),
            )
            .await;

        let error = result.error().expect("failure");
        assert!(error.is_timeout());
        assert!(!error.is_connection_error());
        assert!(client.is_open());

        service.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_server_can_request_from_client() -> anyhow::Result<()> {
        let (service, url) = start_service().await;
        let client = Client::connect(&url, ProxyConfig::default(), echo_handlers).await?;
        wait_for_count(&service, 1).await;

        let (_, server_side) = service
            .connections()
            .into_iter()
            .next()
            .context("tracked connection")?;

        let result = server_side
            .send_request_with_timeout(Request::new("echo", 42)?, SCENARIO_TIMEOUT)
            .await;
        assert!(result.is_successful());
        assert_eq!(assert_ok!(result.into_result()), json!(42));

        client.close().await;
        service.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_broadcast_reaches_clients() {
        let (service, url) = start_service().await;

        let (news_tx, mut news_rx) = mpsc::unbounded_channel();
        let mut clients = Vec::new();
        for _ in 0..2 {
            let news_tx = news_tx.clone();
            let client = Client::connect(&url, ProxyConfig::default(), move |_connection| {
                MessageHandlers::builder()
                    .set_handler("news", move |message: Message| {
                        let _ = news_tx.send(message.into_body());
                        async { Ok(()) }
                    })
                    .build()
            })
            .await
            .expect("connect");
            clients.push(client);
        }
        wait_for_count(&service, 2).await;

        let summary = assert_ok!(
            service
                .broadcast(Message::notification("news", "extra").expect("valid"))
                .await
        );
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.failed, 0);

        for _ in 0..2 {
            let body = timeout(SCENARIO_TIMEOUT, news_rx.recv())
                .await
                .expect("delivered in time")
                .expect("delivered");
            assert_eq!(body, json!("extra"));
        }

        service.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_client_close_unregisters_on_server() {
        let (service, url) = start_service().await;
        let client = Client::connect(&url, ProxyConfig::default(), |_connection| {
            MessageHandlers::builder().build()
        })
        .await
        .expect("connect");
        wait_for_count(&service, 1).await;

        client.close().await;
        timeout(SCENARIO_TIMEOUT, client.closed())
            .await
            .expect("client closed");
        assert_eq!(client.state(), ConnectionState::Closed);
        wait_for_count(&service, 0).await;

        service.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_urls() {
        let factory = |_connection: ConnectionHandle| MessageHandlers::builder().build();

        let err = Client::connect("http://localhost:1", ProxyConfig::default(), factory)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = Client::connect("not a url", ProxyConfig::default(), factory)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
