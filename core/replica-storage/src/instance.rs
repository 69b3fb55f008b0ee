use crate::error::StorageResult;
use crate::persister::Persister;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::PoisonError;

/// A logical key/value table inside one database.
///
/// Handles are cheap and hold no connection; each call resolves the
/// database through the [`Persister`], so a dropped database is simply
/// recreated empty on next use.
#[derive(Debug, Clone)]
pub struct StorageInstance {
    persister: Persister,
    database: String,
    table: String,
}

impl StorageInstance {
    pub(crate) fn new(persister: Persister, database: String, table: &str) -> Self {
        Self {
            persister,
            database,
            table: table.to_string(),
        }
    }

    /// The database this table lives in.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The logical table name (a store name, or a shared table).
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Reads and decodes the value stored under `key`.
    pub fn get_item<V: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<V>> {
        let conn = self.persister.connection(&self.database)?;
        let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE store = ?1 AND key = ?2",
                params![self.table, key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(Into::into)
    }

    /// Encodes and stores `value` under `key`, replacing any previous value.
    pub fn set_item<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.persister.connection(&self.database)?;
        let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR REPLACE INTO kv (store, key, value) VALUES (?1, ?2, ?3)",
            params![self.table, key, json],
        )?;
        Ok(())
    }

    /// Removes `key`. Returns whether a value was present.
    pub fn remove_item(&self, key: &str) -> StorageResult<bool> {
        let conn = self.persister.connection(&self.database)?;
        let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = conn.execute(
            "DELETE FROM kv WHERE store = ?1 AND key = ?2",
            params![self.table, key],
        )?;
        Ok(removed > 0)
    }

    /// Lists the keys in this table, sorted.
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.persister.connection(&self.database)?;
        let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE store = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![self.table], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Removes every key in this table.
    pub fn clear(&self) -> StorageResult<()> {
        let conn = self.persister.connection(&self.database)?;
        let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute("DELETE FROM kv WHERE store = ?1", params![self.table])?;
        Ok(())
    }
}
