//! Message handler registry.
//!
//! Maps a message type tag to an async handler, with an optional fallback for
//! unmapped types. Built once with [`MessageHandlersBuilder`] and read-only
//! afterwards, so dispatch needs no locking.
//!
//! # Example
//!
//! ```ignore
//! let handlers = MessageHandlers::builder()
//!     .set_handler("echo", move |message: Message| {
//!         let connection = connection.clone();
//!         async move {
//!             let response = message.create_response(message.body())?;
//!             connection.send_message(response).await;
//!             Ok(())
//!         }
//!     })
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::connection::Controller;
use crate::error::{Error, Result};

use super::message::{Message, message_types};

// ============================================================================
// Types
// ============================================================================

/// Future returned by a message handler.
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// Type-erased message handler.
pub type Handler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

fn erase<F, Fut>(handler: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |message| handler(message).boxed())
}

// ============================================================================
// MessageHandlers
// ============================================================================

/// Dispatch table from message type to handler.
#[derive(Clone, Default)]
pub struct MessageHandlers {
    handlers: FxHashMap<String, Handler>,
    fallback: Option<Handler>,
}

impl MessageHandlers {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> MessageHandlersBuilder {
        MessageHandlersBuilder::default()
    }

    /// Returns the currently mapped message types.
    pub fn mapped_message_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Returns `true` if a handler is mapped for `message_type`.
    #[inline]
    #[must_use]
    pub fn has_handler(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    /// Returns `true` if a fallback handler is set.
    #[inline]
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Runs the handler mapped for the message's type.
    ///
    /// Falls back to the fallback handler when no handler is mapped.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownMessageType`] if nothing is mapped and no fallback is set
    /// - whatever the selected handler returns
    pub async fn handle(&self, message: Message) -> Result<()> {
        let handler = match self.handlers.get(message.message_type()) {
            Some(handler) => handler,
            None => match &self.fallback {
                Some(fallback) => {
                    trace!(message_type = %message.message_type(), "Using fallback handler");
                    fallback
                }
                None => return Err(Error::unknown_message_type(message.message_type())),
            },
        };

        handler(message).await
    }
}

impl fmt::Debug for MessageHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.mapped_message_types().collect();
        types.sort_unstable();
        f.debug_struct("MessageHandlers")
            .field("types", &types)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl Controller for MessageHandlers {
    async fn on_message(&self, message: Message) -> Result<()> {
        self.handle(message).await
    }
}

// ============================================================================
// MessageHandlersBuilder
// ============================================================================

/// Builder for [`MessageHandlers`].
#[derive(Default)]
pub struct MessageHandlersBuilder {
    handlers: FxHashMap<String, Handler>,
    fallback: Option<Handler>,
}

impl MessageHandlersBuilder {
    /// Maps `message_type` to `handler`, replacing any previous mapping.
    #[must_use]
    pub fn set_handler<F, Fut>(mut self, message_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers.insert(message_type.into(), erase(handler));
        self
    }

    /// Removes the mapping for `message_type`.
    #[must_use]
    pub fn remove_handler(mut self, message_type: &str) -> Self {
        self.handlers.remove(message_type);
        self
    }

    /// Sets the handler used for unmapped types.
    #[must_use]
    pub fn set_fallback<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.fallback = Some(erase(handler));
        self
    }

    /// Restores the default fallback, which fails with
    /// [`Error::UnknownMessageType`].
    #[must_use]
    pub fn remove_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a handler is mapped to an empty or
    /// reserved type tag.
    pub fn build(self) -> Result<MessageHandlers> {
        for message_type in self.handlers.keys() {
            if message_type.is_empty() {
                return Err(Error::config("handler mapped to an empty message type"));
            }
            if message_types::is_reserved(message_type) {
                return Err(Error::config(format!(
                    "handler mapped to reserved message type '{message_type}'"
                )));
            }
        }

        Ok(MessageHandlers {
            handlers: self.handlers,
            fallback: self.fallback,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    fn counting(counter: Arc<AtomicUsize>) -> impl Fn(Message) -> HandlerFuture + Send + Sync {
        move |_message| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler_only() {
        let echo = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));
        let fallback = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = Arc::clone(&seen);
        let echo_clone = Arc::clone(&echo);
        let handlers = MessageHandlers::builder()
            .set_handler("echo", move |message: Message| {
                echo_clone.fetch_add(1, Ordering::SeqCst);
                *seen_clone.lock() = Some(message);
                async { Ok(()) }
            })
            .set_handler("other", counting(Arc::clone(&other)))
            .set_fallback(counting(Arc::clone(&fallback)))
            .build()
            .expect("build");

        let message = Message::notification("echo", "hi").expect("valid");
        handlers.handle(message.clone()).await.expect("handled");

        assert_eq!(echo.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
        assert_eq!(fallback.load(Ordering::SeqCst), 0);
        assert_eq!(seen.lock().as_ref(), Some(&message));
    }

    #[tokio::test]
    async fn test_set_handler_overwrites() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let handlers = MessageHandlers::builder()
            .set_handler("echo", counting(Arc::clone(&first)))
            .set_handler("echo", counting(Arc::clone(&second)))
            .build()
            .expect("build");

        handlers
            .handle(Message::notification("echo", ()).expect("valid"))
            .await
            .expect("handled");

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmapped_without_fallback_fails() {
        let echo = Arc::new(AtomicUsize::new(0));
        let handlers = MessageHandlers::builder()
            .set_handler("echo", counting(Arc::clone(&echo)))
            .build()
            .expect("build");

        let err = handlers
            .handle(Message::notification("missing", ()).expect("valid"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownMessageType { ref message_type } if message_type == "missing"));
        assert_eq!(echo.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmapped_uses_fallback() {
        let fallback = Arc::new(AtomicUsize::new(0));
        let handlers = MessageHandlers::builder()
            .set_fallback(counting(Arc::clone(&fallback)))
            .build()
            .expect("build");

        handlers
            .handle(Message::notification("anything", ()).expect("valid"))
            .await
            .expect("handled");
        assert_eq!(fallback.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_handler_and_fallback() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handlers = MessageHandlers::builder()
            .set_handler("echo", counting(Arc::clone(&counter)))
            .set_fallback(counting(Arc::clone(&counter)))
            .remove_handler("echo")
            .remove_fallback()
            .build()
            .expect("build");

        assert!(!handlers.has_handler("echo"));
        assert!(!handlers.has_fallback());
        assert!(
            handlers
                .handle(Message::notification("echo", ()).expect("valid"))
                .await
                .is_err()
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_build_rejects_reserved_types() {
        let counter = Arc::new(AtomicUsize::new(0));
        let result = MessageHandlers::builder()
            .set_handler("Error", counting(Arc::clone(&counter)))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_mapped_message_types() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handlers = MessageHandlers::builder()
            .set_handler("a", counting(Arc::clone(&counter)))
            .set_handler("b", counting(Arc::clone(&counter)))
            .build()
            .expect("build");

        let mut types: Vec<_> = handlers.mapped_message_types().collect();
        types.sort_unstable();
        assert_eq!(types, vec!["a", "b"]);
    }
}
