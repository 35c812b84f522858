//! In-memory `ChatApi` for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use uuid::Uuid;

use murmur_types::api::MessageResponse;

use crate::client::ChatApi;
use crate::error::ApiError;

#[derive(Debug, Default)]
pub struct MemoryApi {
    keys: Mutex<HashMap<Uuid, String>>,
    messages: Mutex<Vec<MessageResponse>>,
    uploaded: Mutex<Option<String>>,
    key_fetches: AtomicUsize,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `public_key` fetchable for `user_id`.
    pub fn publish_key(&self, user_id: Uuid, public_key: impl Into<String>) {
        self.keys.lock().insert(user_id, public_key.into());
    }

    pub fn push_message(&self, message: MessageResponse) {
        self.messages.lock().push(message);
    }

    /// Last key passed to `upload_public_key`.
    pub fn uploaded_key(&self) -> Option<String> {
        self.uploaded.lock().clone()
    }

    /// Number of `fetch_public_key` calls so far.
    pub fn key_fetches(&self) -> usize {
        self.key_fetches.load(Ordering::SeqCst)
    }
}

impl ChatApi for MemoryApi {
    async fn fetch_public_key(&self, user_id: Uuid) -> Result<String, ApiError> {
        self.key_fetches.fetch_add(1, Ordering::SeqCst);
        self.keys
            .lock()
            .get(&user_id)
            .cloned()
            .ok_or(ApiError::KeyNotFound(user_id))
    }

    async fn upload_public_key(&self, public_key: &str) -> Result<(), ApiError> {
        *self.uploaded.lock() = Some(public_key.to_string());
        Ok(())
    }

    async fn fetch_messages(&self, peer_id: Uuid) -> Result<Vec<MessageResponse>, ApiError> {
        let mut history: Vec<MessageResponse> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.sender_id == peer_id || m.receiver_id == peer_id)
            .cloned()
            .collect();
        history.sort_by_key(|m| m.created_at);
        Ok(history)
    }
}
