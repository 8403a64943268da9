//! In-memory transport for tests.
//!
//! Records outbound frames and lets tests inject inbound events and
//! failures without a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::protocol::Message;

use super::capability::{Transport, TransportEvent, TransportEventSender, TransportEvents};

/// Scriptable [`Transport`] double.
pub(crate) struct MockTransport {
    sent: Mutex<Vec<String>>,
    sent_count: watch::Sender<usize>,
    events: TransportEventSender,
    open: AtomicBool,
    fail_send: AtomicBool,
    fail_close: AtomicBool,
    fail_probe: AtomicBool,
    close_calls: AtomicUsize,
    closed: watch::Sender<bool>,
}

impl MockTransport {
    pub(crate) fn new() -> (Arc<Self>, TransportEvents) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            sent_count: watch::Sender::new(0),
            events,
            open: AtomicBool::new(true),
            fail_send: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            closed: watch::Sender::new(false),
        });
        (transport, events_rx)
    }

    // ------------------------------------------------------------------------
    // Failure switches
    // ------------------------------------------------------------------------

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_closes(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_probes(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------------
    // Inbound injection
    // ------------------------------------------------------------------------

    pub(crate) fn push_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    pub(crate) fn push_message(&self, message: &Message) {
        let text = message.to_json().expect("encode test message");
        self.push_text(text);
    }

    pub(crate) fn push_error(&self, error: Error) {
        let _ = self.events.send(TransportEvent::Error(error));
    }

    /// Simulates the peer closing the connection.
    pub(crate) fn push_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Close);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .iter()
            .map(|text| Message::from_json(text).expect("sent frame is an envelope"))
            .collect()
    }

    /// Waits until at least `count` frames were sent.
    pub(crate) async fn wait_for_sent(&self, count: usize) -> Vec<Message> {
        let mut rx = self.sent_count.subscribe();
        rx.wait_for(|sent| *sent >= count)
            .await
            .expect("mock transport alive");
        self.sent_messages()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Waits until `close` was called at least once.
    pub(crate) async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        rx.wait_for(|closed| *closed)
            .await
            .expect("mock transport alive");
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_open(&self) -> Result<bool> {
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(Error::connection("probe failed"));
        }
        Ok(self.open.load(Ordering::SeqCst))
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::connection("send failed"));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let count = {
            let mut sent = self.sent.lock();
            sent.push(text);
            sent.len()
        };
        self.sent_count.send_replace(count);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);

        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::connection("close failed"));
        }

        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Close);
        }
        Ok(())
    }
}
