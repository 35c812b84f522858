use std::collections::HashMap;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use p256::PublicKey;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::provider::{CryptoProvider, KeyPair, StoredKeyPair};
use crate::store::KeyStore;

/// KeyStore slot holding the private JWK.
pub const PRIVATE_KEY_SLOT: &str = "e2e_private_key";

/// KeyStore slot holding the public JWK.
pub const PUBLIC_KEY_SLOT: &str = "e2e_public_key";

/// Owns the local key pair and the table of peers' public keys.
///
/// Both are behind locks: network tasks store peer keys while the UI side
/// encrypts.
pub struct KeyManager {
    provider: Arc<dyn CryptoProvider>,
    store: Arc<dyn KeyStore>,
    key_pair: RwLock<Option<KeyPair>>,
    peer_keys: RwLock<HashMap<Uuid, PublicKey>>,
}

impl KeyManager {
    pub fn new(provider: Arc<dyn CryptoProvider>, store: Arc<dyn KeyStore>) -> Self {
        Self {
            provider,
            store,
            key_pair: RwLock::new(None),
            peer_keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }

    // -- Local key pair --

    /// Create a fresh key pair and make it current. Does not persist it.
    pub fn generate_key_pair(&self) -> Result<KeyPair> {
        let pair = self.provider.generate_key_pair()?;
        *self.key_pair.write() = Some(pair.clone());
        info!("Generated new P-256 key pair");
        Ok(pair)
    }

    pub fn key_pair(&self) -> Option<KeyPair> {
        self.key_pair.read().clone()
    }

    pub fn has_key_pair(&self) -> bool {
        self.key_pair.read().is_some()
    }

    /// Base64 SPKI of our public key, generating a pair first if needed.
    ///
    /// Concurrent first calls agree on one pair: the check and the generation
    /// happen under the same write lock.
    pub fn export_public_key(&self) -> Result<String> {
        let public = {
            let mut slot = self.key_pair.write();
            match slot.as_ref() {
                Some(pair) => pair.public_key().clone(),
                None => {
                    let pair = self.provider.generate_key_pair()?;
                    let public = pair.public_key().clone();
                    *slot = Some(pair);
                    info!("Generated new P-256 key pair");
                    public
                }
            }
        };
        let der = self.provider.export_spki(&public)?;
        Ok(BASE64.encode(der))
    }

    /// Write both halves to the KeyStore as JWK.
    pub fn save_key_pair(&self) -> Result<()> {
        let pair = self.key_pair().ok_or(CryptoError::NoLocalKeyPair)?;
        let stored = self.provider.export_jwk(&pair)?;

        self.store.set(PRIVATE_KEY_SLOT, &stored.private_jwk)?;
        self.store.set(PUBLIC_KEY_SLOT, &stored.public_jwk)?;

        debug!("Key pair saved to key store");
        Ok(())
    }

    /// Restore the key pair from the KeyStore.
    ///
    /// Returns `Ok(false)` when nothing (or only one half) is stored.
    pub fn load_key_pair(&self) -> Result<bool> {
        let private = self.store.get(PRIVATE_KEY_SLOT)?;
        let public = self.store.get(PUBLIC_KEY_SLOT)?;

        let (private_jwk, public_jwk) = match (private, public) {
            (Some(private), Some(public)) => (Zeroizing::new(private), public),
            (None, None) => return Ok(false),
            _ => {
                warn!("Key store holds only one half of the key pair, ignoring it");
                return Ok(false);
            }
        };

        let pair = self.provider.import_jwk(&StoredKeyPair {
            private_jwk,
            public_jwk,
        })?;
        *self.key_pair.write() = Some(pair);

        info!("Loaded key pair from key store");
        Ok(true)
    }

    /// Forget the local key pair, in memory and in the store.
    pub fn clear_key_pair(&self) -> Result<()> {
        self.store.delete(PRIVATE_KEY_SLOT)?;
        self.store.delete(PUBLIC_KEY_SLOT)?;
        *self.key_pair.write() = None;
        info!("Cleared local key pair");
        Ok(())
    }

    /// Load the stored key pair, or generate and persist a new one.
    /// Returns the public key to upload to the key directory.
    pub fn initialize(&self) -> Result<String> {
        if !self.load_key_pair()? {
            self.generate_key_pair()?;
            self.save_key_pair()?;
        }
        self.export_public_key()
    }

    // -- Peer keys --

    /// Decode a peer's base64 SPKI blob.
    pub fn import_public_key(&self, blob: &str) -> Result<PublicKey> {
        let der = BASE64
            .decode(blob.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("public key is not base64: {}", e)))?;
        self.provider.import_spki(&der)
    }

    /// Import and record a peer's key, replacing any earlier one.
    pub fn store_peer_public_key(&self, peer_id: Uuid, blob: &str) -> Result<()> {
        let key = self.import_public_key(blob)?;
        if self.peer_keys.write().insert(peer_id, key).is_some() {
            debug!(%peer_id, "Replaced stored public key");
        } else {
            debug!(%peer_id, "Stored public key");
        }
        Ok(())
    }

    pub fn peer_public_key(&self, peer_id: Uuid) -> Option<PublicKey> {
        self.peer_keys.read().get(&peer_id).cloned()
    }

    pub fn has_peer_key(&self, peer_id: Uuid) -> bool {
        self.peer_keys.read().contains_key(&peer_id)
    }

    pub fn forget_peer(&self, peer_id: Uuid) {
        self.peer_keys.write().remove(&peer_id);
    }

    // -- Fingerprints --

    /// Fingerprint of our own public key.
    pub fn fingerprint(&self) -> Result<String> {
        let pair = self.key_pair().ok_or(CryptoError::NoLocalKeyPair)?;
        Ok(fingerprint_of(&self.provider.export_spki(pair.public_key())?))
    }

    /// Fingerprint of a peer's public key, for out-of-band comparison.
    pub fn peer_fingerprint(&self, peer_id: Uuid) -> Result<String> {
        let key = self
            .peer_public_key(peer_id)
            .ok_or(CryptoError::UnknownPeer(peer_id))?;
        Ok(fingerprint_of(&self.provider.export_spki(&key)?))
    }
}

/// SHA-256 of the SPKI bytes as sixteen space-separated groups of four hex digits.
pub fn fingerprint_of(spki: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(spki));
    digest
        .as_bytes()
        .chunks(4)
        .map(|group| String::from_utf8_lossy(group).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
