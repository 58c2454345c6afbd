//! Durable key-value persistence for the conversation cache
//!
//! Storage is best-effort: a failed read yields an empty cache and a failed
//! write is logged and dropped, never surfaced to the caller.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::warn;

use crate::conversation::{normalize, ConversationRecord};

/// Storage key holding the JSON array of cached conversations
pub const CACHE_KEY: &str = "chat:conversations";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// A durable string key-value store
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// SQLite-backed key-value store
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the database at the given path
    pub async fn new(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// In-memory database, gone when the pool closes
    pub async fn new_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let backend = Self { pool };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Process-local backend for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Reads and writes the conversation list under [`CACHE_KEY`]
#[derive(Clone)]
pub struct ConversationCache {
    backend: Arc<dyn KeyValueBackend>,
}

impl ConversationCache {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Persisted conversations, or an empty list if storage is unreadable
    pub async fn load(&self) -> Vec<ConversationRecord> {
        match self.try_load().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable conversation cache");
                Vec::new()
            }
        }
    }

    /// Persist the list; failures are logged and dropped
    pub async fn store(&self, records: &[ConversationRecord]) {
        if let Err(e) = self.try_store(records).await {
            warn!(error = %e, "Failed to persist conversation cache");
        }
    }

    async fn try_load(&self) -> Result<Vec<ConversationRecord>, StorageError> {
        let Some(raw) = self.backend.get(CACHE_KEY).await? else {
            return Ok(Vec::new());
        };

        // re-normalize so older or foreign entries come back in canonical shape
        let items: Vec<Value> = serde_json::from_str(&raw)?;
        Ok(items.iter().map(normalize).collect())
    }

    async fn try_store(&self, records: &[ConversationRecord]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(records)?;
        self.backend.set(CACHE_KEY, &raw).await
    }
}
