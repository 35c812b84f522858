use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

use murmur_api::ChatApi;
use murmur_crypto::{CryptoEngine, KeyManager};
use murmur_gateway::{
    ConnectionConfig, ConnectionManager, ConnectionState, Connector, DecryptedMessage, MessageRouter,
    RouterConfig, RouterEvent, ensure_peer_key,
};

use crate::error::SessionError;

/// One signed-in user: their keys, the server connection and the open
/// conversation.
pub struct ChatSession<A, C> {
    keys: Arc<KeyManager>,
    engine: CryptoEngine,
    api: Arc<A>,
    connection: ConnectionManager<C>,
    router: MessageRouter,
}

impl<A: ChatApi, C: Connector> ChatSession<A, C> {
    /// Build a session and the stream of UI events it produces.
    ///
    /// Nothing touches the network until `start`. Must be called from within
    /// a tokio runtime.
    pub fn new(
        keys: Arc<KeyManager>,
        api: Arc<A>,
        connector: C,
        connection: ConnectionConfig,
        router: RouterConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let engine = CryptoEngine::new(keys.clone());
        let connection = ConnectionManager::new(connector, connection);
        let (router, events) = MessageRouter::spawn(&connection, engine.clone(), api.clone(), router);

        let session = Self {
            keys,
            engine,
            api,
            connection,
            router,
        };
        (session, events)
    }

    /// Load or create our key pair, publish the public half, then connect.
    pub async fn start(&self, token: &str) -> Result<(), SessionError> {
        let public_key = self.keys.initialize()?;
        self.api.upload_public_key(&public_key).await?;
        info!("Public key published");

        self.connection.connect(token);
        Ok(())
    }

    /// Make `peer` the active conversation and return its decrypted history,
    /// oldest first. Messages that fail to decrypt carry the placeholder text.
    pub async fn open_conversation(&self, peer: Uuid) -> Result<Vec<DecryptedMessage>, SessionError> {
        self.router.set_active_peer(Some(peer));
        ensure_peer_key(&self.keys, self.api.as_ref(), peer).await?;

        let history = self.api.fetch_messages(peer).await?;
        history
            .iter()
            .map(|message| -> Result<DecryptedMessage, SessionError> {
                let me = if message.sender_id == peer {
                    message.receiver_id
                } else {
                    message.sender_id
                };
                let content = self
                    .engine
                    .decrypt_message(peer, &message.encrypted_content, &message.iv)?;
                Ok(DecryptedMessage::new(message, me, content, true))
            })
            .collect()
    }

    pub fn close_conversation(&self) {
        self.router.set_active_peer(None);
    }

    pub fn active_peer(&self) -> Option<Uuid> {
        self.router.active_peer()
    }

    /// Encrypt `text` for the active peer and send it.
    ///
    /// The server echoes it back, so it shows up as an outgoing
    /// `RouterEvent::Message`.
    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        let peer = self.active_peer().ok_or(SessionError::NoActivePeer)?;
        if !self.connection.is_connected() {
            return Err(SessionError::NotConnected);
        }

        ensure_peer_key(&self.keys, self.api.as_ref(), peer).await?;
        let payload = self.engine.encrypt_message(peer, text)?;
        self.connection
            .send_message(peer, payload.encrypted_content, payload.iv);
        Ok(())
    }

    /// Tell the active peer we are typing. No-op without a peer or connection.
    pub fn notify_typing(&self) {
        if let Some(peer) = self.active_peer() {
            if self.connection.is_connected() {
                self.connection.send_typing(peer);
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.connection.user_id()
    }

    pub fn fingerprint(&self) -> Result<String, SessionError> {
        Ok(self.keys.fingerprint()?)
    }

    pub fn peer_fingerprint(&self, peer: Uuid) -> Result<String, SessionError> {
        Ok(self.keys.peer_fingerprint(peer)?)
    }

    pub fn close(&self) {
        self.connection.disconnect();
    }
}
