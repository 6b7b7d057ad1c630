// src/storage/memory.rs

use crate::error::Result;
use crate::storage::KvStorage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::trace;

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
    // first-insertion position, kept across overwrites
    seq: u64,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Default)]
struct Entries {
    // namespace -> key -> entry
    namespaces: HashMap<String, HashMap<String, MemoryEntry>>,
    next_seq: u64,
}

/// In-process implementation of [`KvStorage`].
///
/// Clones share the same entries. Each namespace keeps its own key map, so
/// one namespace never sees another's keys whatever their names.
#[derive(Clone)]
pub struct MemoryStorage {
    base: String,
    ttl: Option<Duration>,
    entries: Arc<RwLock<Entries>>,
}

impl MemoryStorage {
    /// New storage for namespace `base`. A zero `ttl` disables expiry.
    pub fn new(base: impl Into<String>, ttl: Duration) -> Self {
        Self {
            base: base.into(),
            ttl: (!ttl.is_zero()).then_some(ttl),
            entries: Arc::new(RwLock::new(Entries::default())),
        }
    }

    /// Another namespace over the same underlying map.
    pub fn namespace(&self, base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            ttl: self.ttl,
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

#[async_trait]
impl KvStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        trace!("MemoryStorage::get: waiting for read lock");
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .namespaces
            .get(&self.base)
            .and_then(|own| own.get(key))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        trace!("MemoryStorage::set: waiting for write lock");
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let expires_at = self.ttl.map(|ttl| now + ttl);
        let Entries {
            namespaces,
            next_seq,
        } = &mut *entries;
        let own = namespaces.entry(self.base.clone()).or_default();

        let keep_seq = own
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.seq);
        let seq = match keep_seq {
            Some(seq) => seq,
            None => {
                let seq = *next_seq;
                *next_seq += 1;
                seq
            }
        };

        own.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at,
                seq,
            },
        );
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        trace!("MemoryStorage::list_keys: waiting for write lock");
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let Some(own) = entries.namespaces.get_mut(&self.base) else {
            return Ok(Vec::new());
        };
        own.retain(|_, entry| entry.is_live(now));

        let mut keys: Vec<(u64, String)> = own
            .iter()
            .map(|(key, entry)| (entry.seq, key.clone()))
            .collect();
        keys.sort_by_key(|(seq, _)| *seq);
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(own) = entries.namespaces.get_mut(&self.base) {
            own.remove(key);
        }
        Ok(())
    }
}
