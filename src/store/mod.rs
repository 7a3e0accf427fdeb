//! Persistence for reports and run history
//!
//! Writes are keyed upserts so a run repeated for the same natural key
//! (a date, say) overwrites instead of duplicating.

mod schema;
mod sqlite;

pub use sqlite::{RunHistoryEntry, SqliteStore};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to prepare store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Key-value persistence used by workflow steps
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace the value stored under `key`
    async fn upsert(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    async fn find_by_key(&self, key: &str) -> Result<Option<Value>, StoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(key).cloned())
    }
}
