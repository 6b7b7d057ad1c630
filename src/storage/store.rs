// src/storage/store.rs

use crate::error::{preview_key, Result};
use crate::storage::{ApiKey, KeyStatus, KeyStatusStore, KeyStatusUpdate, KvStorage};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// [`KeyStatusStore`] over a generic [`KvStorage`].
///
/// One JSON record per key, stored under the key itself. No caching: every
/// read goes to the storage so updates from other processes are observed.
#[derive(Clone)]
pub struct KeyPoolStore {
    storage: Arc<dyn KvStorage>,
}

impl KeyPoolStore {
    pub fn new(storage: Arc<dyn KvStorage>) -> Self {
        Self { storage }
    }

    async fn read(&self, key: &str) -> Result<Option<KeyStatus>> {
        let Some(raw) = self.storage.get(key).await? else {
            return Ok(None);
        };
        let status: KeyStatus = serde_json::from_str(&raw)?;
        if status.is_rate_limited && status.rate_limited_at.is_none() {
            warn!(
                api_key.preview = %preview_key(key),
                "Key is rate limited without a timestamp and will not cool down on its own"
            );
        }
        Ok(Some(status))
    }

    async fn write(&self, status: &KeyStatus) -> Result<()> {
        let raw = serde_json::to_string(status)?;
        self.storage.set(&status.key, raw).await
    }
}

#[async_trait]
impl KeyStatusStore for KeyPoolStore {
    async fn init(&self, keys: &[ApiKey]) -> Result<()> {
        // Sequential so first-insertion order follows the key list
        let mut created = 0usize;
        for key in keys {
            if self.storage.has(key).await? {
                continue;
            }
            self.write(&KeyStatus::new(key.clone())).await?;
            created += 1;
        }

        debug!(
            keys.total = keys.len(),
            keys.created = created,
            "Key statuses initialized"
        );
        Ok(())
    }

    async fn get_all_key_statuses(&self) -> Result<Vec<KeyStatus>> {
        let keys = self.storage.list_keys().await?;
        trace!("KeyPoolStore::get_all_key_statuses: {} keys listed", keys.len());
        let records = try_join_all(keys.iter().map(|key| self.read(key))).await?;
        Ok(records.into_iter().flatten().collect())
    }

    async fn get_key_status(&self, key: &str) -> Result<Option<KeyStatus>> {
        self.read(key).await
    }

    async fn update_key_status(&self, key: &str, update: KeyStatusUpdate) -> Result<()> {
        let Some(mut status) = self.read(key).await? else {
            trace!(
                api_key.preview = %preview_key(key),
                "Ignoring update for uninitialized key"
            );
            return Ok(());
        };
        status.apply(&update);
        self.write(&status).await
    }

    async fn reset(&self) -> Result<()> {
        let keys = self.storage.list_keys().await?;
        try_join_all(keys.iter().map(|key| self.storage.remove(key))).await?;
        debug!(keys.removed = keys.len(), "Key statuses reset");
        Ok(())
    }
}
