use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StoreError;

/// Persistent slot storage for the local key pair.
///
/// Values are opaque strings (JWK documents). Implementations decide where
/// they live: memory, a SQLite file, an OS keychain.
pub trait KeyStore: Send + Sync {
    fn get(&self, slot: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, slot: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing slot is not an error.
    fn delete(&self, slot: &str) -> Result<(), StoreError>;
}

/// Process-local store. Keys do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, slot: &str) -> Result<Option<String>, StoreError> {
        Ok(self.slots.lock().get(slot).cloned())
    }

    fn set(&self, slot: &str, value: &str) -> Result<(), StoreError> {
        self.slots.lock().insert(slot.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, slot: &str) -> Result<(), StoreError> {
        self.slots.lock().remove(slot);
        Ok(())
    }
}
