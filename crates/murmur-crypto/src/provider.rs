use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::{PublicKey, SecretKey, ecdh};
use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, Result};

/// AES-GCM nonce length in bytes.
pub const IV_LEN: usize = 12;

/// Length of the ECDH output used directly as the AES-256 key.
pub const SHARED_KEY_LEN: usize = 32;

/// How many out-of-range scalars we tolerate before giving up on key generation.
/// A P-256 candidate is rejected with probability ~2^-32, so this never trips
/// with a working entropy source.
const MAX_SCALAR_CANDIDATES: usize = 8;

/// The local user's P-256 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// AES-256-GCM key derived from an ECDH exchange.
///
/// Usable only for encrypt/decrypt through a `CryptoProvider`; the bytes are
/// not reachable from outside this crate and are wiped on drop. Only the
/// crate's own providers can build or read one.
pub struct SharedKey {
    bytes: [u8; SHARED_KEY_LEN],
}

impl SharedKey {
    pub(crate) fn from_bytes(bytes: [u8; SHARED_KEY_LEN]) -> Self {
        Self { bytes }
    }

    fn as_bytes(&self) -> &[u8; SHARED_KEY_LEN] {
        &self.bytes
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

/// Both halves of a key pair in JWK form, as written to a `KeyStore`.
pub struct StoredKeyPair {
    pub private_jwk: Zeroizing<String>,
    pub public_jwk: String,
}

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// The cryptographic capabilities the core needs.
///
/// `P256Provider` is the production implementation. Tests can swap in a
/// seeded provider (see the `test-util` feature) to get reproducible keys and
/// IVs and to count how often each primitive ran.
///
/// Sealed: a `SharedKey` exposes no bytes, so a provider outside this crate
/// could derive keys it can never use. Other crates pick an implementation
/// but cannot add one.
///
/// ```compile_fail
/// use murmur_crypto::error::Result;
/// use murmur_crypto::provider::{CryptoProvider, IV_LEN, KeyPair, SharedKey, StoredKeyPair};
/// use p256::{PublicKey, SecretKey};
///
/// struct Outside;
///
/// impl CryptoProvider for Outside {
///     fn generate_key_pair(&self) -> Result<KeyPair> { unimplemented!() }
///     fn derive_bits(&self, _: &SecretKey, _: &PublicKey) -> Result<SharedKey> { unimplemented!() }
///     fn random_iv(&self) -> Result<[u8; IV_LEN]> { unimplemented!() }
///     fn encrypt(&self, _: &SharedKey, _: &[u8; IV_LEN], _: &[u8]) -> Result<Vec<u8>> { unimplemented!() }
///     fn decrypt(&self, _: &SharedKey, _: &[u8; IV_LEN], _: &[u8]) -> Result<Vec<u8>> { unimplemented!() }
///     fn export_spki(&self, _: &PublicKey) -> Result<Vec<u8>> { unimplemented!() }
///     fn import_spki(&self, _: &[u8]) -> Result<PublicKey> { unimplemented!() }
///     fn export_jwk(&self, _: &KeyPair) -> Result<StoredKeyPair> { unimplemented!() }
///     fn import_jwk(&self, _: &StoredKeyPair) -> Result<KeyPair> { unimplemented!() }
/// }
/// ```
pub trait CryptoProvider: sealed::Sealed + Send + Sync {
    /// Fresh ECDH P-256 key pair.
    fn generate_key_pair(&self) -> Result<KeyPair>;

    /// 256-bit ECDH output between our secret and a peer's public key,
    /// imported as an AES-256-GCM key.
    fn derive_bits(&self, secret: &SecretKey, public: &PublicKey) -> Result<SharedKey>;

    /// A fresh nonce. Must never repeat under the same key.
    fn random_iv(&self) -> Result<[u8; IV_LEN]>;

    /// AES-GCM encrypt; the 128-bit tag is appended to the ciphertext.
    fn encrypt(&self, key: &SharedKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Inverse of `encrypt`. Tag mismatch is `DecryptionFailure`.
    fn decrypt(&self, key: &SharedKey, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// DER-encoded SubjectPublicKeyInfo.
    fn export_spki(&self, public: &PublicKey) -> Result<Vec<u8>>;

    fn import_spki(&self, der: &[u8]) -> Result<PublicKey>;

    fn export_jwk(&self, pair: &KeyPair) -> Result<StoredKeyPair>;

    /// Rebuilds a key pair from its JWK halves, rejecting halves that disagree.
    fn import_jwk(&self, stored: &StoredKeyPair) -> Result<KeyPair>;
}

/// RustCrypto-backed provider: `p256` for ECDH, `aes-gcm` for AEAD, OS entropy.
#[derive(Debug, Default, Clone, Copy)]
pub struct P256Provider;

impl P256Provider {
    pub fn new() -> Self {
        Self
    }
}

impl sealed::Sealed for P256Provider {}

impl CryptoProvider for P256Provider {
    fn generate_key_pair(&self) -> Result<KeyPair> {
        secret_from_source(|candidate| {
            OsRng
                .try_fill_bytes(candidate)
                .map_err(|e| CryptoError::Provider(format!("entropy source failed: {}", e)))
        })
        .map(KeyPair::from_secret)
    }

    fn derive_bits(&self, secret: &SecretKey, public: &PublicKey) -> Result<SharedKey> {
        let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
        let mut bytes = [0u8; SHARED_KEY_LEN];
        bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(SharedKey::from_bytes(bytes))
    }

    fn random_iv(&self) -> Result<[u8; IV_LEN]> {
        let mut iv = [0u8; IV_LEN];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CryptoError::Provider(format!("entropy source failed: {}", e)))?;
        Ok(iv)
    }

    fn encrypt(&self, key: &SharedKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|e| CryptoError::Provider(format!("encryption failed: {}", e)))
    }

    fn decrypt(&self, key: &SharedKey, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailure("authentication tag mismatch".into()))
    }

    fn export_spki(&self, public: &PublicKey) -> Result<Vec<u8>> {
        let document = public
            .to_public_key_der()
            .map_err(|e| CryptoError::Provider(format!("SPKI encoding failed: {}", e)))?;
        Ok(document.as_bytes().to_vec())
    }

    fn import_spki(&self, der: &[u8]) -> Result<PublicKey> {
        PublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("not a P-256 SPKI key: {}", e)))
    }

    fn export_jwk(&self, pair: &KeyPair) -> Result<StoredKeyPair> {
        Ok(StoredKeyPair {
            private_jwk: pair.secret.to_jwk_string(),
            public_jwk: pair.public.to_jwk_string(),
        })
    }

    fn import_jwk(&self, stored: &StoredKeyPair) -> Result<KeyPair> {
        let secret = SecretKey::from_jwk_str(&stored.private_jwk)
            .map_err(|_| CryptoError::InvalidKeyFormat("private JWK is malformed".into()))?;
        let public = PublicKey::from_jwk_str(&stored.public_jwk)
            .map_err(|_| CryptoError::InvalidKeyFormat("public JWK is malformed".into()))?;

        let pair = KeyPair::from_secret(secret);
        if pair.public != public {
            return Err(CryptoError::InvalidKeyFormat(
                "stored public key does not match the private key".into(),
            ));
        }
        Ok(pair)
    }
}

/// Draws 32-byte candidates from `fill` until one is a valid P-256 scalar.
pub(crate) fn secret_from_source<F>(mut fill: F) -> Result<SecretKey>
where
    F: FnMut(&mut [u8; 32]) -> Result<()>,
{
    let mut candidate = Zeroizing::new([0u8; 32]);
    for _ in 0..MAX_SCALAR_CANDIDATES {
        fill(&mut *candidate)?;
        if let Ok(secret) = SecretKey::from_slice(candidate.as_slice()) {
            return Ok(secret);
        }
    }
    Err(CryptoError::Provider(
        "entropy source keeps producing invalid scalars".into(),
    ))
}
