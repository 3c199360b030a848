//! Persisted key-value storage behind the device registry.
//! The registry only needs string slots; anything structured (the saved
//! address list) is JSON-encoded by the caller. Malformed or missing data is
//! always treated as empty rather than surfaced as an error.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use log::{info, warn};
use tokio::fs;
use tokio::sync::Mutex;

use crate::utils::ensure_directory_exists;

/// Narrow persistence interface for device records
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` when absent or unreadable
    async fn get_string(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one
    async fn put_string(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key; a no-op when absent
    async fn remove(&self, key: &str) -> Result<()>;
}

/// File-backed store holding one flat string map as pretty-printed JSON
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Option<HashMap<String, String>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    async fn read_from_disk(&self) -> HashMap<String, String> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(_) => {
                warn!("Store file not found at {:?}, starting empty.", self.path);
                return HashMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entries) => {
                info!("Store loaded from {:?}", self.path);
                entries
            }
            Err(e) => {
                warn!("Store file {:?} is malformed ({}), treating as empty.", self.path, e);
                HashMap::new()
            }
        }
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_directory_exists(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json).await?;
        Ok(())
    }

    async fn with_entries(&self) -> tokio::sync::MutexGuard<'_, Option<HashMap<String, String>>> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_from_disk().await);
        }
        guard
    }
}

#[async_trait::async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_string(&self, key: &str) -> Option<String> {
        let guard = self.with_entries().await;
        guard.as_ref().and_then(|entries| entries.get(key).cloned())
    }

    async fn put_string(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.with_entries().await;
        let entries = guard.get_or_insert_with(HashMap::new);
        entries.insert(key.to_string(), value.to_string());
        self.persist(entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.with_entries().await;
        let entries = guard.get_or_insert_with(HashMap::new);
        if entries.remove(key).is_some() {
            self.persist(entries).await?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_string(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    async fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
