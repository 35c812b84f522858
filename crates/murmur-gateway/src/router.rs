use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesOrdered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use murmur_api::ChatApi;
use murmur_crypto::{CryptoEngine, KeyManager};
use murmur_types::api::MessageResponse;

use crate::connection::ConnectionManager;
use crate::error::GatewayError;
use crate::observers::Subscription;
use crate::transport::Connector;
use crate::typing::{DEFAULT_TYPING_TIMEOUT, TypingIndicator};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub typing_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
        }
    }
}

/// A message after decryption, from our point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub id: Uuid,
    /// The other party, whichever direction the message went.
    pub peer_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    /// We sent it (the server echoes our own sends back).
    pub outgoing: bool,
    pub in_active_conversation: bool,
}

impl DecryptedMessage {
    pub fn new(message: &MessageResponse, me: Uuid, content: String, in_active_conversation: bool) -> Self {
        Self {
            id: message.id,
            peer_id: message.peer_of(me),
            sender_id: message.sender_id,
            content,
            created_at: message.created_at,
            is_read: message.is_read,
            outgoing: message.sender_id == me,
            in_active_conversation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    Message(DecryptedMessage),
    TypingStarted { peer: Uuid },
    TypingStopped { peer: Uuid },
}

/// Make sure `peer`'s public key is known, fetching it from the directory
/// on first contact.
pub async fn ensure_peer_key<A: ChatApi>(keys: &KeyManager, api: &A, peer: Uuid) -> Result<(), GatewayError> {
    if keys.has_peer_key(peer) {
        return Ok(());
    }
    let blob = api.fetch_public_key(peer).await?;
    keys.store_peer_public_key(peer, &blob)?;
    debug!(%peer, "Fetched peer public key");
    Ok(())
}

/// Turns connection events into UI events.
///
/// Messages are decrypted and forwarded in arrival order. A message waiting
/// on a peer key fetch holds back later messages but not typing events.
/// Typing signals drive the indicator for the active conversation. The background task
/// stops when the router is dropped.
pub struct MessageRouter {
    active_peer: watch::Sender<Option<Uuid>>,
    task: JoinHandle<()>,
}

impl MessageRouter {
    pub fn spawn<C: Connector, A: ChatApi>(
        connection: &ConnectionManager<C>,
        engine: CryptoEngine,
        api: Arc<A>,
        config: RouterConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let messages = connection.on_message();
        let typing = connection.on_typing();
        let (active_peer, active_rx) = watch::channel(None);
        let (events_tx, events) = mpsc::unbounded_channel();

        let worker = Worker {
            connection: connection.clone(),
            engine,
            api,
            indicator: TypingIndicator::new(config.typing_timeout),
            active_peer: active_rx,
            events: events_tx,
        };
        let task = tokio::spawn(worker.run(messages, typing));

        (Self { active_peer, task }, events)
    }

    /// Open a conversation with `peer`, or close it with `None`.
    pub fn set_active_peer(&self, peer: Option<Uuid>) {
        self.active_peer.send_replace(peer);
    }

    pub fn active_peer(&self) -> Option<Uuid> {
        *self.active_peer.borrow()
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Worker<C, A> {
    connection: ConnectionManager<C>,
    engine: CryptoEngine,
    api: Arc<A>,
    indicator: TypingIndicator,
    active_peer: watch::Receiver<Option<Uuid>>,
    events: mpsc::UnboundedSender<RouterEvent>,
}

/// A decrypted inbound message waiting to be emitted.
struct Routed {
    message: MessageResponse,
    me: Uuid,
    peer: Uuid,
    content: String,
}

impl<C: Connector, A: ChatApi> Worker<C, A> {
    async fn run(mut self, mut messages: Subscription<MessageResponse>, mut typing: Subscription<Uuid>) {
        // Decryption may wait on a key fetch; completions come out in arrival order
        let mut pending: FuturesOrdered<BoxFuture<'static, Option<Routed>>> = FuturesOrdered::new();

        loop {
            let deadline = self.indicator.deadline();

            // Peer switches first, so signals queued behind a switch see the new peer
            tokio::select! {
                biased;

                changed = self.active_peer.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let peer = *self.active_peer.borrow_and_update();
                    if let Some(hidden) = self.indicator.set_active_peer(peer) {
                        self.emit(RouterEvent::TypingStopped { peer: hidden });
                    }
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(peer) = self.indicator.poll_expired(Instant::now()) {
                        self.emit(RouterEvent::TypingStopped { peer });
                    }
                }

                Some(routed) = pending.next(), if !pending.is_empty() => {
                    if let Some(routed) = routed {
                        let active = *self.active_peer.borrow() == Some(routed.peer);
                        self.emit(RouterEvent::Message(DecryptedMessage::new(
                            &routed.message,
                            routed.me,
                            routed.content,
                            active,
                        )));
                    }
                }

                message = messages.recv() => match message {
                    Some(message) => {
                        if let Some(route) = self.route_message(message) {
                            pending.push_back(route);
                        }
                    }
                    None => break,
                },

                sender = typing.recv() => match sender {
                    Some(sender) => {
                        if self.indicator.on_signal(sender, Instant::now()) {
                            self.emit(RouterEvent::TypingStarted { peer: sender });
                        }
                    }
                    None => break,
                },
            }
        }
    }

    fn route_message(&self, message: MessageResponse) -> Option<BoxFuture<'static, Option<Routed>>> {
        let Some(me) = self.connection.user_id() else {
            warn!(id = %message.id, "Dropping message received before authentication");
            return None;
        };
        let engine = self.engine.clone();
        let api = self.api.clone();

        Some(
            async move {
                let peer = message.peer_of(me);
                if let Err(e) = ensure_peer_key(engine.keys(), api.as_ref(), peer).await {
                    warn!(%peer, "Cannot decrypt message {}: {}", message.id, e);
                    return None;
                }

                match engine.decrypt_message(peer, &message.encrypted_content, &message.iv) {
                    Ok(content) => Some(Routed {
                        message,
                        me,
                        peer,
                        content,
                    }),
                    Err(e) => {
                        warn!(%peer, "Cannot decrypt message {}: {}", message.id, e);
                        None
                    }
                }
            }
            .boxed(),
        )
    }

    fn emit(&self, event: RouterEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use murmur_api::ApiError;
    use murmur_api::testing::MemoryApi;
    use murmur_crypto::{MemoryKeyStore, P256Provider};
    use murmur_types::events::{ClientFrame, ServerFrame};

    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::state::ConnectionState;
    use crate::testing::{ChannelConnector, ServerEnd};

    fn new_engine() -> CryptoEngine {
        let keys = Arc::new(KeyManager::new(
            Arc::new(P256Provider::new()),
            Arc::new(MemoryKeyStore::new()),
        ));
        keys.initialize().unwrap();
        CryptoEngine::new(keys)
    }

    /// `MemoryApi` whose key lookups take `delay` to answer.
    struct SlowApi {
        inner: MemoryApi,
        delay: Duration,
    }

    impl ChatApi for SlowApi {
        async fn fetch_public_key(&self, user_id: Uuid) -> Result<String, ApiError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.fetch_public_key(user_id).await
        }

        async fn upload_public_key(&self, public_key: &str) -> Result<(), ApiError> {
            self.inner.upload_public_key(public_key).await
        }

        async fn fetch_messages(&self, peer_id: Uuid) -> Result<Vec<MessageResponse>, ApiError> {
            self.inner.fetch_messages(peer_id).await
        }
    }

    struct Harness {
        me: Uuid,
        peer: Uuid,
        engine: CryptoEngine,
        peer_engine: CryptoEngine,
        api: Arc<SlowApi>,
        router: MessageRouter,
        events: mpsc::UnboundedReceiver<RouterEvent>,
        server: ServerEnd,
        _connection: ConnectionManager<ChannelConnector>,
    }

    /// Router over an authenticated connection; the peer's key is published
    /// but not yet known locally.
    async fn harness() -> Harness {
        harness_with_fetch_delay(Duration::ZERO).await
    }

    async fn harness_with_fetch_delay(delay: Duration) -> Harness {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let engine = new_engine();
        let peer_engine = new_engine();
        peer_engine
            .keys()
            .store_peer_public_key(me, &engine.keys().export_public_key().unwrap())
            .unwrap();

        let api = Arc::new(SlowApi {
            inner: MemoryApi::new(),
            delay,
        });
        api.inner
            .publish_key(peer, peer_engine.keys().export_public_key().unwrap());

        let (connector, mut accepted) = ChannelConnector::new();
        let connection = ConnectionManager::new(connector, ConnectionConfig::new("ws://test"));
        let (router, events) = MessageRouter::spawn(&connection, engine.clone(), api.clone(), RouterConfig::default());

        connection.connect("t");
        let mut server = accepted.recv().await.unwrap();
        assert!(matches!(server.recv().await, Some(ClientFrame::Auth { .. })));
        server.send(&ServerFrame::Connected { user_id: me });
        connection
            .watch_state()
            .wait_for(|s| *s == ConnectionState::Authenticated)
            .await
            .unwrap();

        Harness {
            me,
            peer,
            engine,
            peer_engine,
            api,
            router,
            events,
            server,
            _connection: connection,
        }
    }

    fn sealed(engine: &CryptoEngine, sender: Uuid, receiver: Uuid, text: &str) -> MessageResponse {
        let payload = engine.encrypt_message(receiver, text).unwrap();
        MessageResponse {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            encrypted_content: payload.encrypted_content,
            iv: payload.iv,
            created_at: Utc::now(),
            is_read: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn typing_indicator_hides_after_two_seconds() {
        let mut h = harness().await;
        h.router.set_active_peer(Some(h.peer));
        let start = Instant::now();

        h.server.send(&ServerFrame::TypingIndicator { sender_id: h.peer });
        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStarted { peer: h.peer }));
        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStopped { peer: h.peer }));
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_signal_resets_timer() {
        let mut h = harness().await;
        h.router.set_active_peer(Some(h.peer));
        let start = Instant::now();

        h.server.send(&ServerFrame::TypingIndicator { sender_id: h.peer });
        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStarted { peer: h.peer }));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        h.server.send(&ServerFrame::TypingIndicator { sender_id: h.peer });

        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStopped { peer: h.peer }));
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn signals_from_other_peers_are_dropped() {
        let mut h = harness().await;
        h.router.set_active_peer(Some(h.peer));

        h.server.send(&ServerFrame::TypingIndicator {
            sender_id: Uuid::new_v4(),
        });
        h.server.send(&ServerFrame::TypingIndicator { sender_id: h.peer });

        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStarted { peer: h.peer }));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_conversation_hides_indicator() {
        let mut h = harness().await;
        h.router.set_active_peer(Some(h.peer));
        h.server.send(&ServerFrame::TypingIndicator { sender_id: h.peer });
        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStarted { peer: h.peer }));

        let start = Instant::now();
        h.router.set_active_peer(Some(Uuid::new_v4()));
        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStopped { peer: h.peer }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn inbound_message_is_decrypted_after_key_fetch() {
        let mut h = harness().await;
        h.router.set_active_peer(Some(h.peer));

        let first = sealed(&h.peer_engine, h.peer, h.me, "hello");
        let second = sealed(&h.peer_engine, h.peer, h.me, "again");
        h.server.send(&ServerFrame::MessageReceived {
            message: first.clone(),
        });
        h.server.send(&ServerFrame::MessageReceived { message: second });

        let Some(RouterEvent::Message(message)) = h.events.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(message.id, first.id);
        assert_eq!(message.content, "hello");
        assert_eq!(message.peer_id, h.peer);
        assert!(!message.outgoing);
        assert!(message.in_active_conversation);

        let Some(RouterEvent::Message(message)) = h.events.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(message.content, "again");
        assert_eq!(h.api.inner.key_fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_expires_while_key_fetch_is_pending() {
        let mut h = harness_with_fetch_delay(Duration::from_secs(5)).await;
        h.router.set_active_peer(Some(h.peer));
        let start = Instant::now();

        h.server.send(&ServerFrame::TypingIndicator { sender_id: h.peer });
        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStarted { peer: h.peer }));

        let first = sealed(&h.peer_engine, h.peer, h.me, "slow");
        let second = sealed(&h.peer_engine, h.peer, h.me, "behind");
        h.server.send(&ServerFrame::MessageReceived { message: first });
        h.server.send(&ServerFrame::MessageReceived { message: second });

        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStopped { peer: h.peer }));
        assert_eq!(start.elapsed(), Duration::from_millis(2000));

        let Some(RouterEvent::Message(message)) = h.events.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(message.content, "slow");
        assert_eq!(start.elapsed(), Duration::from_secs(5));

        let Some(RouterEvent::Message(message)) = h.events.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(message.content, "behind");
    }

    #[tokio::test]
    async fn echo_of_own_send_is_outgoing() {
        let mut h = harness().await;
        let me = h.me;
        let peer = h.peer;

        // Our side needs the peer key to encrypt
        ensure_peer_key(h.engine.keys(), h.api.as_ref(), peer).await.unwrap();
        let mine = sealed(&h.engine, me, peer, "sent by me");
        h.server.send(&ServerFrame::MessageReceived { message: mine });

        let Some(RouterEvent::Message(message)) = h.events.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(message.content, "sent by me");
        assert_eq!(message.peer_id, peer);
        assert!(message.outgoing);
        assert!(!message.in_active_conversation);
    }

    #[tokio::test]
    async fn message_without_published_key_is_skipped() {
        let mut h = harness().await;
        let stranger = Uuid::new_v4();
        h.router.set_active_peer(Some(h.peer));

        let mut bogus = sealed(&h.peer_engine, h.peer, h.me, "hi");
        bogus.sender_id = stranger;
        h.server.send(&ServerFrame::MessageReceived { message: bogus });
        h.server.send(&ServerFrame::TypingIndicator { sender_id: h.peer });

        assert_eq!(h.events.recv().await, Some(RouterEvent::TypingStarted { peer: h.peer }));
    }
}
