use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The entropy source or a primitive refused to run.
    #[error("crypto provider unavailable: {0}")]
    Provider(String),

    /// An imported public key or stored key pair could not be parsed.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// No public key on record for this peer; fetch it first.
    #[error("no public key on record for peer {0}")]
    UnknownPeer(Uuid),

    #[error("no local key pair; initialize the key manager first")]
    NoLocalKeyPair,

    /// Tag mismatch or corrupt input. `CryptoEngine::decrypt_message` turns
    /// this into a placeholder instead of returning it.
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of a `KeyStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key store backend error: {0}")]
    Backend(String),
}
