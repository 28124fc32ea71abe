use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

/// Local key-value storage backed by a single `settings` table.
///
/// Values are opaque strings; callers that need structure store JSON.
pub struct Storage {
    conn: Connection,
}

pub type StorageState = Arc<Mutex<Storage>>;

impl Storage {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(storage.get("model").unwrap(), None);

        storage.set("model", "llama3").unwrap();
        storage.set("model", "mistral").unwrap();
        assert_eq!(storage.get("model").unwrap().as_deref(), Some("mistral"));
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aura.db");

        Storage::open(&path).unwrap().set("apiKey", "").unwrap();

        let reopened = Storage::open(&path).unwrap();
        assert_eq!(reopened.get("apiKey").unwrap().as_deref(), Some(""));
    }
}
