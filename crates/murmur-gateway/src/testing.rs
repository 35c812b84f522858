//! In-process transport for tests.
//!
//! Every successful `connect` hands the test a [`ServerEnd`] that plays the
//! server: it reads the client's frames and pushes server frames back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use murmur_types::events::{ClientFrame, ServerFrame};

use crate::error::GatewayError;
use crate::transport::{Connector, Transport};

#[derive(Clone)]
pub struct ChannelConnector {
    shared: Arc<Shared>,
}

struct Shared {
    refusing: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl ChannelConnector {
    /// The receiver yields one `ServerEnd` per accepted connection.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            shared: Arc::new(Shared {
                refusing: AtomicBool::new(false),
                attempts: Mutex::new(Vec::new()),
                accepted,
            }),
        };
        (connector, rx)
    }

    /// While set, every `connect` fails.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// When each `connect` call happened, accepted or not.
    pub fn attempts(&self) -> Vec<Instant> {
        self.shared.attempts.lock().clone()
    }
}

impl Connector for ChannelConnector {
    async fn connect(&self, _url: &str) -> Result<Transport, GatewayError> {
        self.shared.attempts.lock().push(Instant::now());
        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(GatewayError::Connect("connection refused".into()));
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        self.shared
            .accepted
            .send(ServerEnd {
                from_client,
                to_client,
            })
            .map_err(|_| GatewayError::TransportClosed)?;

        Ok(Transport { outbound, inbound })
    }
}

/// Server side of one accepted connection. Drop it to close the transport.
#[derive(Debug)]
pub struct ServerEnd {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl ServerEnd {
    /// Next frame from the client; `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        let text = self.from_client.recv().await?;
        Some(serde_json::from_str(&text).expect("client sent an invalid frame"))
    }

    pub fn try_recv(&mut self) -> Option<ClientFrame> {
        let text = self.from_client.try_recv().ok()?;
        Some(serde_json::from_str(&text).expect("client sent an invalid frame"))
    }

    pub fn send(&self, frame: &ServerFrame) {
        let _ = self.to_client.send(serde_json::to_string(frame).expect("frame serializes"));
    }

    /// Push raw text, for malformed-frame cases.
    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(text.to_string());
    }
}
