use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("user {0} has not published a public key")]
    KeyNotFound(Uuid),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}
