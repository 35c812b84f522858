use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;

/// Frames sent FROM client TO server over the chat WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate the connection with a session token
    Auth { token: String },

    /// Deliver an encrypted message to a peer
    Message {
        receiver_id: Uuid,
        encrypted_content: String,
        iv: String,
    },

    /// Notify a peer that we are typing
    Typing { receiver_id: Uuid },
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
        }
    }
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake succeeded
    Connected { user_id: Uuid },

    /// A message addressed to us, or the echo of one we sent
    MessageReceived { message: MessageResponse },

    /// A peer is typing to us
    TypingIndicator { sender_id: Uuid },

    /// Non-fatal server-side error report
    Error { message: String },
}

impl ServerFrame {
    /// Short label used in logs; never includes payload contents.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::MessageReceived { .. } => "message_received",
            Self::TypingIndicator { .. } => "typing_indicator",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_use_flat_type_tag() {
        let receiver_id = Uuid::new_v4();
        let frame = ClientFrame::Message {
            receiver_id,
            encrypted_content: "Y2lwaGVy".into(),
            iv: "AAAAAAAAAAAAAAAA".into(),
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "receiver_id": receiver_id,
                "encrypted_content": "Y2lwaGVy",
                "iv": "AAAAAAAAAAAAAAAA",
            })
        );

        let auth = serde_json::to_value(ClientFrame::Auth { token: "t".into() }).unwrap();
        assert_eq!(auth, json!({ "type": "auth", "token": "t" }));
    }

    #[test]
    fn parses_server_message_received() {
        let raw = r#"{
            "type": "message_received",
            "message": {
                "id": "6f1c1f0e-8a0b-4bde-9a43-0f3c8f7f2a10",
                "sender_id": "0b7d5a52-65d6-4d36-8a1c-3c2b5d0f9e11",
                "receiver_id": "a3f1e6c4-7d1b-4a5e-b6c2-9d8e7f6a5b4c",
                "encrypted_content": "abc",
                "iv": "def",
                "created_at": "2024-03-01T12:00:00.123456+00:00",
                "is_read": false
            }
        }"#;

        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ServerFrame::MessageReceived { message } => {
                assert_eq!(message.encrypted_content, "abc");
                assert_eq!(message.iv, "def");
                assert!(!message.is_read);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn is_read_defaults_when_absent() {
        let raw = r#"{
            "type": "message_received",
            "message": {
                "id": "6f1c1f0e-8a0b-4bde-9a43-0f3c8f7f2a10",
                "sender_id": "0b7d5a52-65d6-4d36-8a1c-3c2b5d0f9e11",
                "receiver_id": "a3f1e6c4-7d1b-4a5e-b6c2-9d8e7f6a5b4c",
                "encrypted_content": "abc",
                "iv": "def",
                "created_at": "2024-03-01T12:00:00Z"
            }
        }"#;

        assert!(serde_json::from_str::<ServerFrame>(raw).is_ok());
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let raw = r#"{ "type": "presence", "user_id": "x" }"#;
        assert!(serde_json::from_str::<ServerFrame>(raw).is_err());
    }
}
