/// Integration test: a `ChatSession` against an in-memory directory and an
/// in-process transport, with the test playing the chat server.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use murmur_api::testing::MemoryApi;
use murmur_client::{ChatSession, SessionError};
use murmur_crypto::{
    CryptoEngine, KeyManager, MemoryKeyStore, P256Provider, UNDECRYPTABLE_PLACEHOLDER,
};
use murmur_gateway::testing::{ChannelConnector, ServerEnd};
use murmur_gateway::{ConnectionConfig, ConnectionState, RouterConfig, RouterEvent};
use murmur_types::api::MessageResponse;
use murmur_types::events::{ClientFrame, ServerFrame};

struct Peer {
    id: Uuid,
    engine: CryptoEngine,
}

impl Peer {
    fn new() -> Self {
        let keys = Arc::new(KeyManager::new(
            Arc::new(P256Provider::new()),
            Arc::new(MemoryKeyStore::new()),
        ));
        keys.initialize().unwrap();
        Self {
            id: Uuid::new_v4(),
            engine: CryptoEngine::new(keys),
        }
    }

    fn public_key(&self) -> String {
        self.engine.keys().export_public_key().unwrap()
    }
}

struct Fixture {
    me: Uuid,
    bob: Peer,
    api: Arc<MemoryApi>,
    session: ChatSession<MemoryApi, ChannelConnector>,
    events: mpsc::UnboundedReceiver<RouterEvent>,
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

fn fixture() -> Fixture {
    let bob = Peer::new();
    let api = Arc::new(MemoryApi::new());
    api.publish_key(bob.id, bob.public_key());

    let keys = Arc::new(KeyManager::new(
        Arc::new(P256Provider::new()),
        Arc::new(MemoryKeyStore::new()),
    ));
    let (connector, accepted) = ChannelConnector::new();
    let (session, events) = ChatSession::new(
        keys,
        api.clone(),
        connector,
        ConnectionConfig::new("ws://test"),
        RouterConfig::default(),
    );

    Fixture {
        me: Uuid::new_v4(),
        bob,
        api,
        session,
        events,
        accepted,
    }
}

impl Fixture {
    /// Start the session and complete the server handshake.
    async fn sign_in(&mut self) -> ServerEnd {
        self.session.start("token").await.unwrap();
        let mut server = self.accepted.recv().await.unwrap();
        assert_eq!(
            server.recv().await,
            Some(ClientFrame::Auth {
                token: "token".into()
            })
        );
        server.send(&ServerFrame::Connected { user_id: self.me });
        self.session
            .watch_state()
            .wait_for(|s| *s == ConnectionState::Authenticated)
            .await
            .unwrap();

        // Bob learns our key from the directory
        let ours = self.api.uploaded_key().unwrap();
        self.bob
            .engine
            .keys()
            .store_peer_public_key(self.me, &ours)
            .unwrap();
        server
    }

    fn from_bob(&self, text: &str, minutes_ago: i64) -> MessageResponse {
        let payload = self.bob.engine.encrypt_message(self.me, text).unwrap();
        MessageResponse {
            id: Uuid::new_v4(),
            sender_id: self.bob.id,
            receiver_id: self.me,
            encrypted_content: payload.encrypted_content,
            iv: payload.iv,
            created_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
            is_read: true,
        }
    }
}

#[tokio::test]
async fn start_publishes_key_and_authenticates() {
    let mut f = fixture();
    let _server = f.sign_in().await;

    assert!(f.api.uploaded_key().is_some());
    assert_eq!(f.session.user_id(), Some(f.me));
    assert_eq!(f.session.fingerprint().unwrap().split(' ').count(), 16);
}

#[tokio::test]
async fn send_requires_open_conversation_and_connection() {
    let f = fixture();

    assert!(matches!(
        f.session.send_message("hi").await,
        Err(SessionError::NoActivePeer)
    ));

    f.session.open_conversation(f.bob.id).await.unwrap();
    assert!(matches!(
        f.session.send_message("hi").await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn history_is_decrypted_with_placeholder_for_corrupt_entries() {
    let mut f = fixture();
    let _server = f.sign_in().await;

    let first = f.from_bob("first", 10);
    let mut corrupt = f.from_bob("second", 5);
    corrupt.encrypted_content = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAA==".into();
    f.api.push_message(corrupt);
    f.api.push_message(first);

    let history = f.session.open_conversation(f.bob.id).await.unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", UNDECRYPTABLE_PLACEHOLDER]);
    assert!(history.iter().all(|m| m.peer_id == f.bob.id && !m.outgoing));

    assert_eq!(
        f.session.peer_fingerprint(f.bob.id).unwrap(),
        f.bob.engine.keys().fingerprint().unwrap()
    );
}

#[tokio::test]
async fn sent_message_decrypts_for_the_peer() {
    let mut f = fixture();
    let mut server = f.sign_in().await;
    f.session.open_conversation(f.bob.id).await.unwrap();

    f.session.notify_typing();
    f.session.send_message("hello").await.unwrap();

    assert_eq!(
        server.recv().await,
        Some(ClientFrame::Typing {
            receiver_id: f.bob.id
        })
    );
    let Some(ClientFrame::Message {
        receiver_id,
        encrypted_content,
        iv,
    }) = server.recv().await
    else {
        panic!("expected a message frame");
    };
    assert_eq!(receiver_id, f.bob.id);
    assert_eq!(
        f.bob
            .engine
            .decrypt_message(f.me, &encrypted_content, &iv)
            .unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn inbound_message_becomes_event() {
    let mut f = fixture();
    let server = f.sign_in().await;
    f.session.open_conversation(f.bob.id).await.unwrap();

    let message = f.from_bob("are you there?", 0);
    server.send(&ServerFrame::MessageReceived {
        message: message.clone(),
    });

    let Some(RouterEvent::Message(event)) = f.events.recv().await else {
        panic!("expected a message event");
    };
    assert_eq!(event.id, message.id);
    assert_eq!(event.content, "are you there?");
    assert!(event.in_active_conversation);
    assert!(!event.outgoing);
}

#[tokio::test]
async fn close_disconnects() {
    let mut f = fixture();
    let mut server = f.sign_in().await;

    f.session.close();
    assert_eq!(f.session.state(), ConnectionState::Disconnected);
    assert_eq!(server.recv().await, None);
}
