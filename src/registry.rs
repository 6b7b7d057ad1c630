// src/registry.rs

use crate::client::KeyPoolClient;
use crate::config::{AppConfig, StorageConfig};
use crate::error::{AppError, Result};
use crate::key_pool::KeyPool;
use crate::storage::{KeyPoolStore, KvStorage, MemoryStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Where the pools of a registry keep their key records.
#[derive(Clone)]
enum Backend {
    Memory(MemoryStorage),
    #[cfg(feature = "redis")]
    Redis {
        pool: deadpool_redis::Pool,
        key_prefix: String,
        ttl: Duration,
    },
}

impl Backend {
    fn from_config(config: &StorageConfig) -> Result<Self> {
        let ttl = Duration::from_secs(config.ttl_secs);
        match config.redis_url.as_deref() {
            #[cfg(feature = "redis")]
            Some(redis_url) => {
                let pool = crate::storage::RedisStorage::create_pool(redis_url)?;
                info!("Key status persistence: redis");
                Ok(Self::Redis {
                    pool,
                    key_prefix: config.redis_key_prefix.clone(),
                    ttl,
                })
            }
            #[cfg(not(feature = "redis"))]
            Some(_) => {
                warn!("redis_url is set but the redis feature is disabled; keeping key status in memory");
                Ok(Self::Memory(MemoryStorage::new("", ttl)))
            }
            None => {
                info!("Key status persistence: in-memory");
                Ok(Self::Memory(MemoryStorage::new("", ttl)))
            }
        }
    }

    fn storage_for(&self, pool_name: &str) -> Arc<dyn KvStorage> {
        match self {
            Self::Memory(root) => Arc::new(root.namespace(pool_name)),
            #[cfg(feature = "redis")]
            Self::Redis {
                pool,
                key_prefix,
                ttl,
            } => Arc::new(crate::storage::RedisStorage::new(
                pool.clone(),
                key_prefix,
                pool_name,
                *ttl,
            )),
        }
    }
}

/// Named pools, one per upstream provider, in configuration order.
#[derive(Clone, Default)]
pub struct PoolRegistry {
    pools: Vec<KeyPoolClient>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every configured pool and initializes it with its keys.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let backend = Backend::from_config(&config.storage)?;
        let retry = config.retry.options();
        let mut registry = Self::new();

        for pool_config in &config.pools {
            let store = KeyPoolStore::new(backend.storage_for(&pool_config.name));
            let pool = KeyPool::new(&pool_config.name, Arc::new(store), pool_config.options());
            let client = KeyPoolClient::new(pool).with_retry_defaults(retry);

            let keys = pool_config.resolve_keys();
            if keys.is_empty() {
                warn!(pool = %pool_config.name, "Pool starts without API keys");
            }
            client.initialize(&keys).await?;
            registry.insert(client);
        }

        info!(pools = ?registry.names().collect::<Vec<_>>(), "Pool registry ready");
        Ok(registry)
    }

    /// Adds a pool, replacing one with the same name.
    pub fn insert(&mut self, client: KeyPoolClient) {
        match self
            .pools
            .iter_mut()
            .find(|existing| existing.pool().name() == client.pool().name())
        {
            Some(existing) => *existing = client,
            None => self.pools.push(client),
        }
    }

    pub fn get(&self, name: &str) -> Result<&KeyPoolClient> {
        self.pools
            .iter()
            .find(|client| client.pool().name() == name)
            .ok_or_else(|| AppError::PoolNotFound {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.iter().map(|client| client.pool().name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyPoolClient> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
