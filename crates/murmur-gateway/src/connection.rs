use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_types::api::MessageResponse;
use murmur_types::events::{ClientFrame, ServerFrame};

use crate::error::GatewayError;
use crate::observers::{ObserverId, Registry, Subscription};
use crate::state::{ConnectionAction, ConnectionMachine, ConnectionState, ReconnectPolicy};
use crate::transport::{Connector, Transport};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws/chat`.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Bound on a single connection attempt. An attempt that runs out counts
    /// as a failed connect.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Owns the live connection to the chat server.
///
/// A single driver task runs the handshake, reads frames and reconnects with
/// linear backoff. Handles are cheap to clone and all share that driver.
pub struct ConnectionManager<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C> {
    connector: C,
    config: ConnectionConfig,
    /// Current driver. Also serializes state updates so a superseded driver
    /// can never publish over its successor.
    control: Mutex<Option<Driver>>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    user_id: Mutex<Option<Uuid>>,
    next_observer: AtomicU64,
    messages: Registry<MessageResponse>,
    typing: Registry<Uuid>,
}

struct Driver {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                control: Mutex::new(None),
                state,
                outbound: Mutex::new(None),
                user_id: Mutex::new(None),
                next_observer: AtomicU64::new(1),
                messages: Registry::new(),
                typing: Registry::new(),
            }),
        }
    }

    /// Start connecting with `token`. Replaces any previous connection.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, token: impl Into<String>) {
        let mut control = self.inner.control.lock();
        if let Some(old) = control.take() {
            old.cancel.cancel();
        }

        let mut machine = ConnectionMachine::new(self.inner.config.reconnect);
        let state = machine.on_connect();
        *self.inner.outbound.lock() = None;
        *self.inner.user_id.lock() = None;
        self.inner.state.send_replace(state);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(
            self.inner.clone(),
            token.into(),
            machine,
            cancel.clone(),
        ));
        *control = Some(Driver {
            cancel,
            _task: task,
        });

        info!("Connecting to {}", self.inner.config.url);
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) {
        let mut control = self.inner.control.lock();
        if let Some(driver) = control.take() {
            driver.cancel.cancel();
            info!("Disconnected from chat server");
        }
        *self.inner.outbound.lock() = None;
        *self.inner.user_id.lock() = None;
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    /// Queue `frame` on the open transport. Dropped when there is none.
    pub fn send(&self, frame: &ClientFrame) {
        let outbound = self.inner.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            debug!("Dropping {} frame: no open transport", frame.kind());
            return;
        };

        match serde_json::to_string(frame) {
            Ok(text) => {
                if tx.send(text).is_err() {
                    debug!("Dropping {} frame: transport closed", frame.kind());
                }
            }
            Err(e) => warn!("Failed to serialize {} frame: {}", frame.kind(), e),
        }
    }

    pub fn send_message(&self, receiver_id: Uuid, encrypted_content: String, iv: String) {
        self.send(&ClientFrame::Message {
            receiver_id,
            encrypted_content,
            iv,
        });
    }

    pub fn send_typing(&self, receiver_id: Uuid) {
        self.send(&ClientFrame::Typing { receiver_id });
    }

    /// True only once the server has accepted our token.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Identity the server assigned in its `connected` frame.
    pub fn user_id(&self) -> Option<Uuid> {
        *self.inner.user_id.lock()
    }

    pub fn on_message(&self) -> Subscription<MessageResponse> {
        self.inner.messages.subscribe(self.next_observer_id())
    }

    /// Sender ids of inbound typing signals.
    pub fn on_typing(&self) -> Subscription<Uuid> {
        self.inner.typing.subscribe(self.next_observer_id())
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.messages.unsubscribe(id) || self.inner.typing.unsubscribe(id)
    }

    fn next_observer_id(&self) -> ObserverId {
        self.inner.next_observer.fetch_add(1, Ordering::Relaxed)
    }
}

impl<C> Inner<C> {
    /// Run `f` unless `cancel` has fired; a cancelled driver must not touch shared state.
    fn update(&self, cancel: &CancellationToken, f: impl FnOnce(&Self)) {
        let _control = self.control.lock();
        if !cancel.is_cancelled() {
            f(self);
        }
    }

    fn set_state(&self, cancel: &CancellationToken, state: ConnectionState) {
        self.update(cancel, |inner| {
            inner.state.send_replace(state);
        });
    }

    fn handle_frame(&self, cancel: &CancellationToken, machine: &mut ConnectionMachine, frame: ServerFrame) {
        debug!("<- {}", frame.kind());
        match frame {
            ServerFrame::Connected { user_id } => {
                let state = machine.on_authenticated();
                self.update(cancel, |inner| {
                    *inner.user_id.lock() = Some(user_id);
                    inner.state.send_replace(state);
                });
                info!(%user_id, "Authenticated to chat server");
            }
            ServerFrame::MessageReceived { message } => {
                self.update(cancel, |inner| inner.messages.publish(&message));
            }
            ServerFrame::TypingIndicator { sender_id } => {
                self.update(cancel, |inner| inner.typing.publish(&sender_id));
            }
            ServerFrame::Error { message } => {
                warn!("Chat server reported an error: {}", message);
            }
        }
    }

    /// Handshake and read loop for one open transport. Returns when it closes
    /// or the driver is cancelled.
    async fn run_transport(
        &self,
        cancel: &CancellationToken,
        machine: &mut ConnectionMachine,
        mut transport: Transport,
        token: &str,
    ) {
        let state = machine.on_open();
        self.update(cancel, |inner| {
            *inner.outbound.lock() = Some(transport.outbound.clone());
            inner.state.send_replace(state);
        });

        let auth = ClientFrame::Auth {
            token: token.to_string(),
        };
        match serde_json::to_string(&auth) {
            Ok(text) => {
                let _ = transport.outbound.send(text);
            }
            Err(e) => warn!("Failed to serialize auth frame: {}", e),
        }

        loop {
            let text = tokio::select! {
                _ = cancel.cancelled() => return,
                text = transport.inbound.recv() => match text {
                    Some(text) => text,
                    None => return,
                },
            };

            match serde_json::from_str::<ServerFrame>(&text) {
                Ok(frame) => self.handle_frame(cancel, machine, frame),
                Err(e) => {
                    let raw: String = text.chars().take(200).collect();
                    warn!("Ignoring malformed frame: {} -- raw: {}", e, raw);
                }
            }
        }
    }
}

async fn drive<C: Connector>(
    inner: Arc<Inner<C>>,
    token: String,
    mut machine: ConnectionMachine,
    cancel: CancellationToken,
) {
    let url = inner.config.url.clone();
    let limit = inner.config.connect_timeout;

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(limit, inner.connector.connect(&url)) => {
                result.unwrap_or_else(|_| {
                    Err(GatewayError::Connect(format!("timed out after {}ms", limit.as_millis())))
                })
            }
        };

        match opened {
            Ok(transport) => {
                inner.run_transport(&cancel, &mut machine, transport, &token).await;
                if cancel.is_cancelled() {
                    return;
                }
                info!("Chat connection closed");
            }
            Err(e) => warn!("Could not connect to {}: {}", url, e),
        }

        inner.update(&cancel, |inner| {
            *inner.outbound.lock() = None;
        });

        match machine.on_close() {
            ConnectionAction::ScheduleReconnect { attempt, delay } => {
                inner.set_state(&cancel, machine.state());
                info!(
                    "Reconnecting in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt,
                    machine.policy().max_attempts
                );

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                inner.set_state(&cancel, machine.on_retry());
            }
            ConnectionAction::GiveUp => {
                warn!(
                    "Giving up on {} after {} reconnect attempts",
                    url,
                    machine.attempts()
                );
                inner.update(&cancel, |inner| {
                    *inner.user_id.lock() = None;
                    inner.state.send_replace(ConnectionState::Disconnected);
                });
                return;
            }
        }
    }
}
