use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use p256::PublicKey;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CryptoError, Result};
use crate::keys::KeyManager;
use crate::provider::{IV_LEN, SharedKey};

/// Shown in place of a message that failed authentication or was corrupt.
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[Unable to decrypt message]";

/// Base64 ciphertext and IV, ready for a `message` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub encrypted_content: String,
    pub iv: String,
}

/// Pairwise AES-256-GCM over ECDH-derived keys.
///
/// The shared key is recomputed on every call; it is a pure function of the
/// two key pairs, so concurrent calls need no coordination.
#[derive(Clone)]
pub struct CryptoEngine {
    keys: Arc<KeyManager>,
}

impl CryptoEngine {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// ECDH between our private key and `peer_public`, as an AES-256-GCM key.
    pub fn derive_shared_key(&self, peer_public: &PublicKey) -> Result<SharedKey> {
        let pair = self.keys.key_pair().ok_or(CryptoError::NoLocalKeyPair)?;
        self.keys.provider().derive_bits(pair.secret_key(), peer_public)
    }

    /// Encrypt `plaintext` for `peer_id` under a fresh random IV.
    pub fn encrypt_message(&self, peer_id: Uuid, plaintext: &str) -> Result<EncryptedPayload> {
        let peer_key = self.peer_key(peer_id)?;
        let key = self.derive_shared_key(&peer_key)?;

        let provider = self.keys.provider();
        let iv = provider.random_iv()?;
        let ciphertext = provider.encrypt(&key, &iv, plaintext.as_bytes())?;

        Ok(EncryptedPayload {
            encrypted_content: BASE64.encode(ciphertext),
            iv: BASE64.encode(iv),
        })
    }

    /// Decrypt a message exchanged with `peer_id`.
    ///
    /// Corrupt or tampered input yields `UNDECRYPTABLE_PLACEHOLDER` (the cause
    /// is logged) so one bad message cannot break a conversation view.
    /// Missing keys are still errors.
    pub fn decrypt_message(&self, peer_id: Uuid, encrypted_content: &str, iv: &str) -> Result<String> {
        match self.try_decrypt_message(peer_id, encrypted_content, iv) {
            Err(CryptoError::DecryptionFailure(cause)) => {
                warn!(%peer_id, "Message could not be decrypted: {}", cause);
                Ok(UNDECRYPTABLE_PLACEHOLDER.to_string())
            }
            other => other,
        }
    }

    /// Like `decrypt_message`, but returns `DecryptionFailure` instead of the placeholder.
    pub fn try_decrypt_message(
        &self,
        peer_id: Uuid,
        encrypted_content: &str,
        iv: &str,
    ) -> Result<String> {
        let peer_key = self.peer_key(peer_id)?;

        let ciphertext = BASE64
            .decode(encrypted_content)
            .map_err(|e| CryptoError::DecryptionFailure(format!("ciphertext is not base64: {}", e)))?;
        let iv: [u8; IV_LEN] = BASE64
            .decode(iv)
            .map_err(|e| CryptoError::DecryptionFailure(format!("iv is not base64: {}", e)))?
            .try_into()
            .map_err(|iv: Vec<u8>| {
                CryptoError::DecryptionFailure(format!("iv must be {} bytes, got {}", IV_LEN, iv.len()))
            })?;

        let key = self.derive_shared_key(&peer_key)?;
        let plaintext = self.keys.provider().decrypt(&key, &iv, &ciphertext)?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::DecryptionFailure("plaintext is not UTF-8".into()))
    }

    fn peer_key(&self, peer_id: Uuid) -> Result<PublicKey> {
        self.keys
            .peer_public_key(peer_id)
            .ok_or(CryptoError::UnknownPeer(peer_id))
    }
}
