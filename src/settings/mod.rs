//! Named settings persistence
//!
//! The server registry is persisted as a single named setting. This module
//! provides the key/value store behind it: a SQLite-backed store for the
//! application and an in-memory store for tests and throwaway sessions.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by a settings store
#[derive(Error, Debug)]
pub enum SettingsError {
    /// SQLite failure
    #[error("Settings database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to prepare the settings location
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store lock was poisoned by a panicking writer
    #[error("Settings store lock poisoned")]
    Poisoned,
}

/// Key/value store for named settings
pub trait SettingsStore: Send + Sync {
    /// Read a setting, `None` when it was never written
    fn value(&self, key: &str) -> Result<Option<String>, SettingsError>;

    /// Write (insert or replace) a setting
    fn set_value(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// SQLite-backed settings store
pub struct SqliteSettings {
    conn: Mutex<Connection>,
}

impl SqliteSettings {
    /// Open (and create if needed) the settings database at `path`
    pub fn open(path: &Path) -> Result<Self, SettingsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Settings held in a private in-memory SQLite database
    pub fn in_memory() -> Result<Self, SettingsError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SettingsError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SettingsStore for SqliteSettings {
    fn value(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let conn = self.conn.lock().map_err(|_| SettingsError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let conn = self.conn.lock().map_err(|_| SettingsError::Poisoned)?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// In-memory settings store that counts writes
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set_value` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettings {
    fn value(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
