/// Murmur Crypto Library
///
/// Pairwise end-to-end encryption for direct messages:
/// - P-256 ECDH key agreement between the local key pair and a peer's public key
/// - AES-256-GCM over the raw 256-bit shared secret, 12-byte random IVs
/// - Key pair persisted as JWK through a pluggable `KeyStore`
///
/// The server only relays base64 ciphertext and IVs.

pub mod encrypt;
pub mod error;
pub mod keys;
pub mod provider;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use encrypt::{CryptoEngine, EncryptedPayload, UNDECRYPTABLE_PLACEHOLDER};
pub use error::{CryptoError, StoreError};
pub use keys::KeyManager;
pub use provider::{CryptoProvider, KeyPair, P256Provider};
pub use store::{KeyStore, MemoryKeyStore};
