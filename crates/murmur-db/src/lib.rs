//! SQLite-backed `KeyStore`.
//!
//! One table, `key_slots`, maps a slot name to a string. The crypto layer
//! writes the two JWK halves of the local key pair there; nothing else about
//! a chat is ever persisted.

pub mod migrations;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

/// How long a write waits on another client process holding the same file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Key-slot store on a single SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the key file at `path`, creating missing parent
    /// directories, and make sure `key_slots` exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating key directory {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening key database {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run(&conn)?;

        info!("Key store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Throwaway store; slots vanish with the value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("key store lock poisoned: {}", e))?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_missing_key_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile").join("keys.db");

        let db = Database::open(&path).unwrap();
        db.set_slot("slot", "value").unwrap();
        assert!(path.exists());

        let mode: String = db
            .with_conn(|conn| Ok(conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn in_memory_stores_do_not_share_slots() {
        let first = Database::open_in_memory().unwrap();
        let second = Database::open_in_memory().unwrap();
        first.set_slot("slot", "value").unwrap();
        assert_eq!(second.get_slot("slot").unwrap(), None);
    }
}
