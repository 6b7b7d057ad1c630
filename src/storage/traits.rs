// src/storage/traits.rs

use crate::error::Result;
use crate::storage::{ApiKey, KeyStatus, KeyStatusUpdate};
use async_trait::async_trait;

/// Generic async key-value storage scoped to one namespace.
///
/// Keys passed in and returned are relative to the namespace. Values are
/// serialized JSON text.
#[async_trait]
pub trait KvStorage: Send + Sync {
    /// Read a value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, applying the storage's TTL if it has one
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Check whether a live value exists
    async fn has(&self, key: &str) -> Result<bool>;

    /// List keys in first-insertion order
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Delete a value; deleting an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Persistence of [`KeyStatus`] records, one per initialized key.
#[async_trait]
pub trait KeyStatusStore: Send + Sync {
    /// Create a default status for every key that has none yet
    async fn init(&self, keys: &[ApiKey]) -> Result<()>;

    /// Get every stored status
    async fn get_all_key_statuses(&self) -> Result<Vec<KeyStatus>>;

    /// Get the status of a single key
    async fn get_key_status(&self, key: &str) -> Result<Option<KeyStatus>>;

    /// Merge `update` into an existing status; unknown keys are ignored
    async fn update_key_status(&self, key: &str, update: KeyStatusUpdate) -> Result<()>;

    /// Remove all statuses
    async fn reset(&self) -> Result<()>;
}
