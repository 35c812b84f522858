use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Keys --

/// Body of `GET /api/chat/keys/{user_id}` and `POST /api/chat/keys`.
/// `public_key` is base64 SPKI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyBody {
    pub public_key: String,
}

// -- Messages --

/// A stored chat message as the server relays it.
/// The server only ever sees ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub encrypted_content: String,
    pub iv: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl MessageResponse {
    /// The other party of the conversation this message belongs to, seen from `me`.
    pub fn peer_of(&self, me: Uuid) -> Uuid {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

// -- Conversations --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub user: UserResponse,
    pub last_message: Option<MessageResponse>,
    pub unread_count: i32,
}

/// Error body returned by the REST collaborator: `{"error": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
