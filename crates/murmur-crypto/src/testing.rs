//! Seeded provider for tests.
//!
//! Keys and IVs come from SHA-256 over a seed and a counter, so two runs with
//! the same seed produce the same keys. Every primitive call is counted, which
//! lets tests assert that a guarded operation never reached the provider.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::provider::{
    CryptoProvider, IV_LEN, KeyPair, P256Provider, SharedKey, StoredKeyPair, sealed,
    secret_from_source,
};

#[derive(Debug)]
pub struct DeterministicProvider {
    seed: u64,
    counter: AtomicU64,
    calls: AtomicUsize,
    inner: P256Provider,
}

impl DeterministicProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
            inner: P256Provider::new(),
        }
    }

    /// Total number of primitive invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn next_block(&self, label: &[u8]) -> [u8; 32] {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(label);
        hasher.update(self.seed.to_be_bytes());
        hasher.update(n.to_be_bytes());
        hasher.finalize().into()
    }
}

impl sealed::Sealed for DeterministicProvider {}

impl CryptoProvider for DeterministicProvider {
    fn generate_key_pair(&self) -> Result<KeyPair> {
        self.tick();
        secret_from_source(|candidate| {
            *candidate = self.next_block(b"murmur-test-key");
            Ok(())
        })
        .map(KeyPair::from_secret)
    }

    fn derive_bits(&self, secret: &SecretKey, public: &PublicKey) -> Result<SharedKey> {
        self.tick();
        self.inner.derive_bits(secret, public)
    }

    fn random_iv(&self) -> Result<[u8; IV_LEN]> {
        self.tick();
        let block = self.next_block(b"murmur-test-iv");
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&block[..IV_LEN]);
        Ok(iv)
    }

    fn encrypt(&self, key: &SharedKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.tick();
        self.inner.encrypt(key, iv, plaintext)
    }

    fn decrypt(&self, key: &SharedKey, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.tick();
        self.inner.decrypt(key, iv, ciphertext)
    }

    fn export_spki(&self, public: &PublicKey) -> Result<Vec<u8>> {
        self.tick();
        self.inner.export_spki(public)
    }

    fn import_spki(&self, der: &[u8]) -> Result<PublicKey> {
        self.tick();
        self.inner.import_spki(der)
    }

    fn export_jwk(&self, pair: &KeyPair) -> Result<StoredKeyPair> {
        self.tick();
        self.inner.export_jwk(pair)
    }

    fn import_jwk(&self, stored: &StoredKeyPair) -> Result<KeyPair> {
        self.tick();
        self.inner.import_jwk(stored)
    }
}
