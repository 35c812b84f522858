use std::future::Future;

use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use uuid::Uuid;

use murmur_types::api::{ConversationResponse, ErrorBody, MessageResponse, PublicKeyBody};

use crate::error::ApiError;

/// Request/response side of the chat server: key directory and history.
///
/// The gateway and session are generic over this so tests can swap in an
/// in-memory directory.
pub trait ChatApi: Send + Sync + 'static {
    /// Base64 SPKI public key published by `user_id`.
    fn fetch_public_key(&self, user_id: Uuid) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Publish our own base64 SPKI public key.
    fn upload_public_key(&self, public_key: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Conversation history with `peer_id`, oldest first.
    fn fetch_messages(
        &self,
        peer_id: Uuid,
    ) -> impl Future<Output = Result<Vec<MessageResponse>, ApiError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Everyone we have exchanged messages with, most recent first.
    pub async fn fetch_conversations(&self) -> Result<Vec<ConversationResponse>, ApiError> {
        let resp = self.get("/api/chat/conversations").await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn get(&self, path: &str) -> Result<Response, ApiError> {
        debug!("GET {}", path);
        Ok(self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?)
    }
}

impl ChatApi for ApiClient {
    async fn fetch_public_key(&self, user_id: Uuid) -> Result<String, ApiError> {
        let resp = self.get(&format!("/api/chat/keys/{}", user_id)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::KeyNotFound(user_id));
        }
        let body: PublicKeyBody = check(resp).await?.json().await?;
        Ok(body.public_key)
    }

    async fn upload_public_key(&self, public_key: &str) -> Result<(), ApiError> {
        debug!("POST /api/chat/keys");
        let resp = self
            .http
            .post(format!("{}/api/chat/keys", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&PublicKeyBody {
                public_key: public_key.to_string(),
            })
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn fetch_messages(&self, peer_id: Uuid) -> Result<Vec<MessageResponse>, ApiError> {
        let resp = self.get(&format!("/api/chat/messages/{}", peer_id)).await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Turn a non-2xx response into `ApiError::Status`, preferring the server's
/// `{"error": ...}` message over the raw body.
async fn check(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://localhost:8080/", "t");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
