use anyhow::Result;
use rusqlite::OptionalExtension;

use murmur_crypto::{KeyStore, StoreError};

use crate::Database;

impl Database {
    // -- Key slots --

    pub fn get_slot(&self, slot: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM key_slots WHERE slot = ?1", [slot], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    pub fn set_slot(&self, slot: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO key_slots (slot, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(slot) DO UPDATE SET value = ?2, updated_at = ?3",
                (slot, value, &now),
            )?;
            Ok(())
        })
    }

    pub fn delete_slot(&self, slot: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM key_slots WHERE slot = ?1", [slot])?;
            Ok(())
        })
    }
}

impl KeyStore for Database {
    fn get(&self, slot: &str) -> Result<Option<String>, StoreError> {
        self.get_slot(slot).map_err(backend)
    }

    fn set(&self, slot: &str, value: &str) -> Result<(), StoreError> {
        self.set_slot(slot, value).map_err(backend)
    }

    fn delete(&self, slot: &str) -> Result<(), StoreError> {
        self.delete_slot(slot).map_err(backend)
    }
}

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}
