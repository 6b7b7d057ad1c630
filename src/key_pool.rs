// src/key_pool.rs

use crate::error::{preview_key, AppError, Result};
use crate::storage::{ApiKey, KeyStatus, KeyStatusStore, KeyStatusUpdate};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Selection and lifecycle policy of a [`KeyPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPoolOptions {
    /// Successful uses after which a key is proactively rate limited
    pub max_requests_per_key: u64,
    /// Time a rate-limited key waits before it is eligible again
    pub cool_down_period: Duration,
}

impl Default for KeyPoolOptions {
    fn default() -> Self {
        Self {
            max_requests_per_key: 10,
            cool_down_period: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Least-used key selection over a [`KeyStatusStore`].
///
/// Holds no copies of key state; every decision re-reads the store, so
/// changes made by other processes sharing it are picked up on the next
/// call. Read-then-write sequences are not locked: two concurrent callers
/// may both select and increment the same key, so the usage ceiling is a
/// soft limit.
#[derive(Clone)]
pub struct KeyPool {
    name: String,
    store: Arc<dyn KeyStatusStore>,
    options: KeyPoolOptions,
}

impl KeyPool {
    pub fn new(name: impl Into<String>, store: Arc<dyn KeyStatusStore>, options: KeyPoolOptions) -> Self {
        Self {
            name: name.into(),
            store,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &KeyPoolOptions {
        &self.options
    }

    /// Creates a status for every key not seen before. Safe to call on
    /// every restart.
    #[instrument(level = "info", skip(self, keys), fields(pool = %self.name, keys = keys.len()))]
    pub async fn initialize(&self, keys: &[ApiKey]) -> Result<()> {
        self.store.init(keys).await?;
        info!("Key pool initialized");
        Ok(())
    }

    /// Returns the available key with the lowest usage count.
    ///
    /// Keys whose cool-down has elapsed are recovered first, so they can be
    /// selected by this same call. Ties go to the first key in storage
    /// order. `None` when every key is rate limited.
    #[instrument(level = "debug", skip(self), fields(pool = %self.name))]
    pub async fn get_available_key(&self) -> Result<Option<ApiKey>> {
        let now = Utc::now();

        for status in self.store.get_all_key_statuses().await? {
            if status.is_rate_limited && status.is_cooled_down(now, self.options.cool_down_period) {
                info!(
                    api_key.preview = %preview_key(&status.key),
                    "Cool-down elapsed, key is available again"
                );
                self.store
                    .update_key_status(&status.key, KeyStatusUpdate::cleared())
                    .await?;
            }
        }

        let statuses = self.store.get_all_key_statuses().await?;
        let selected = select_least_used(&statuses);

        match selected {
            Some(status) => debug!(
                api_key.preview = %preview_key(&status.key),
                usage_count = status.usage_count,
                candidates = statuses.len(),
                "Selected least-used API key"
            ),
            None => warn!(
                candidates = statuses.len(),
                "All keys in the pool are currently rate limited"
            ),
        }

        Ok(selected.map(|status| status.key.clone()))
    }

    /// Counts one successful use. Reaching `max_requests_per_key` rate
    /// limits the key in the same write.
    pub async fn record_success(&self, key: &str) -> Result<()> {
        let status = self
            .store
            .get_key_status(key)
            .await?
            .ok_or_else(|| AppError::key_not_found(key))?;

        let now = Utc::now();
        let usage_count = status.usage_count + 1;
        let mut update = KeyStatusUpdate::default()
            .with_usage_count(usage_count)
            .with_last_used_at(now);

        if usage_count >= self.options.max_requests_per_key {
            update.is_rate_limited = Some(true);
            update.rate_limited_at = Some(Some(now));
            info!(
                pool = %self.name,
                api_key.preview = %preview_key(key),
                usage_count,
                "Key reached its request ceiling and is now rate limited"
            );
        }

        self.store.update_key_status(key, update).await
    }

    /// Rate limits a key regardless of its usage count, e.g. after a 429.
    pub async fn mark_rate_limited(&self, key: &str) -> Result<()> {
        let now = Utc::now();
        warn!(
            pool = %self.name,
            api_key.preview = %preview_key(key),
            "API key has been rate limited"
        );
        self.store
            .update_key_status(key, KeyStatusUpdate::rate_limited(now).with_last_used_at(now))
            .await
    }

    /// Every stored status, for introspection.
    pub async fn get_status(&self) -> Result<Vec<KeyStatus>> {
        self.store.get_all_key_statuses().await
    }

    pub async fn get_key_status(&self, key: &str) -> Result<Option<KeyStatus>> {
        self.store.get_key_status(key).await
    }

    /// Clears usage and rate-limit state of one key.
    pub async fn reset_key(&self, key: &str) -> Result<()> {
        info!(pool = %self.name, api_key.preview = %preview_key(key), "Resetting key");
        self.store
            .update_key_status(key, KeyStatusUpdate::cleared())
            .await
    }

    /// Removes every status of the pool.
    pub async fn reset(&self) -> Result<()> {
        info!(pool = %self.name, "Resetting key pool");
        self.store.reset().await
    }
}

/// First available key with the strictly lowest usage count.
fn select_least_used(statuses: &[KeyStatus]) -> Option<&KeyStatus> {
    statuses
        .iter()
        .filter(|status| status.is_available())
        .fold(None, |best: Option<&KeyStatus>, status| match best {
            Some(current) if current.usage_count <= status.usage_count => Some(current),
            _ => Some(status),
        })
}
