//! Application hooks bound to one connection.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Per-connection application logic.
///
/// A controller is created once per connection, usually holding a
/// [`ConnectionHandle`](super::ConnectionHandle) for replies, and lives as
/// long as the connection. Hooks for one connection run one at a time in
/// event order.
///
/// Errors and panics raised by a hook are caught by the proxy and logged.
/// A failed [`Controller::on_message`] is additionally answered with an
/// error response correlated to the inbound message.
///
/// # Example
///
/// ```ignore
/// struct Echo {
///     connection: ConnectionHandle,
/// }
///
/// #[async_trait]
/// impl Controller for Echo {
///     async fn on_message(&self, message: Message) -> Result<()> {
///         let response = message.create_response(message.body())?;
///         self.connection.send_message(response).await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Called once after the connection opens.
    async fn on_open(&self) -> Result<()> {
        Ok(())
    }

    /// Called once after the connection closes.
    async fn on_close(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the transport reports an error.
    async fn on_error(&self, _error: &Error) -> Result<()> {
        Ok(())
    }

    /// Called for every inbound request or notification.
    async fn on_message(&self, message: Message) -> Result<()>;
}

#[async_trait]
impl<T: Controller + ?Sized> Controller for Box<T> {
    async fn on_open(&self) -> Result<()> {
        (**self).on_open().await
    }

    async fn on_close(&self) -> Result<()> {
        (**self).on_close().await
    }

    async fn on_error(&self, error: &Error) -> Result<()> {
        (**self).on_error(error).await
    }

    async fn on_message(&self, message: Message) -> Result<()> {
        (**self).on_message(message).await
    }
}

#[async_trait]
impl<T: Controller + ?Sized> Controller for std::sync::Arc<T> {
    async fn on_open(&self) -> Result<()> {
        (**self).on_open().await
    }

    async fn on_close(&self) -> Result<()> {
        (**self).on_close().await
    }

    async fn on_error(&self, error: &Error) -> Result<()> {
        (**self).on_error(error).await
    }

    async fn on_message(&self, message: Message) -> Result<()> {
        (**self).on_message(message).await
    }
}
