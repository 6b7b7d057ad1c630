// src/storage/redis.rs

use crate::error::Result;
use crate::storage::KvStorage;
use async_trait::async_trait;
use deadpool_redis::{Config, Connection as RedisConnection, Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{info, trace};

const ORDER_SET_SUFFIX: &str = "#order";
const ORDER_COUNTER_SUFFIX: &str = "#seq";

/// Redis implementation of [`KvStorage`].
///
/// Values live at `{prefix}{base}:{key}`. First-insertion order is kept in
/// a sorted set at `{prefix}{base}#order`, scored by the counter at
/// `{prefix}{base}#seq`, so every process sharing the namespace iterates
/// keys the same way. The bookkeeping keys sit outside the `{base}:` value
/// space and cannot clash with any stored key.
#[derive(Clone)]
pub struct RedisStorage {
    pool: Pool,
    namespace: String,
    ttl: Option<Duration>,
}

impl RedisStorage {
    pub fn new(pool: Pool, key_prefix: &str, base: &str, ttl: Duration) -> Self {
        Self {
            pool,
            namespace: format!("{key_prefix}{base}"),
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }

    /// Build a connection pool for `redis_url`.
    pub fn create_pool(redis_url: &str) -> Result<Pool> {
        let pool = Config::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
        info!("Redis connection pool created");
        Ok(pool)
    }

    fn prefix_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn order_set_key(&self) -> String {
        format!("{}{}", self.namespace, ORDER_SET_SUFFIX)
    }

    fn order_counter_key(&self) -> String {
        format!("{}{}", self.namespace, ORDER_COUNTER_SUFFIX)
    }

    async fn get_connection(&self) -> Result<RedisConnection> {
        self.pool.get().await.map_err(Into::into)
    }
}

#[async_trait]
impl KvStorage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        trace!("RedisStorage::get: start");
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.prefix_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        trace!("RedisStorage::set: start");
        let mut conn = self.get_connection().await?;
        let value_key = self.prefix_key(key);

        let seq: i64 = conn.incr(self.order_counter_key(), 1).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        match self.ttl {
            Some(ttl) => {
                pipe.set_ex(&value_key, value, ttl.as_secs().max(1));
            }
            None => {
                pipe.set(&value_key, value);
            }
        }
        pipe.cmd("ZADD")
            .arg(self.order_set_key())
            .arg("NX")
            .arg(seq)
            .arg(key)
            .ignore();

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let exists: bool = conn.exists(self.prefix_key(key)).await?;
        Ok(exists)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        trace!("RedisStorage::list_keys: start");
        let mut conn = self.get_connection().await?;
        let keys: Vec<String> = conn.zrange(self.order_set_key(), 0, -1).await?;
        trace!("RedisStorage::list_keys: found {} keys", keys.len());
        Ok(keys)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.prefix_key(key)).ignore();
        pipe.zrem(self.order_set_key(), key).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> Option<String> {
        std::env::var("REDIS_URL").ok()
    }

    #[test]
    fn test_bookkeeping_keys_are_outside_value_space() {
        let pool = RedisStorage::create_pool("redis://127.0.0.1:6379").unwrap();
        let storage = RedisStorage::new(pool, "key-pool:", "weather", Duration::ZERO);

        assert_eq!(storage.prefix_key("#order"), "key-pool:weather:#order");
        assert_eq!(storage.order_set_key(), "key-pool:weather#order");
        assert_eq!(storage.order_counter_key(), "key-pool:weather#seq");
        for key in ["__order", "__seq", "#order", "#seq"] {
            assert_ne!(storage.prefix_key(key), storage.order_set_key());
            assert_ne!(storage.prefix_key(key), storage.order_counter_key());
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_keys_named_like_bookkeeping_are_plain_values() {
        let Some(url) = redis_url() else { return };
        let pool = RedisStorage::create_pool(&url).unwrap();
        let base = format!("test-{}", uuid::Uuid::new_v4());
        let storage = RedisStorage::new(pool, "tide_keypool_test:", &base, Duration::ZERO);

        for key in ["__order", "__seq", "#order", "#seq", "k"] {
            storage.set(key, "{}".to_string()).await.unwrap();
        }
        assert_eq!(
            storage.list_keys().await.unwrap(),
            vec!["__order", "__seq", "#order", "#seq", "k"]
        );

        for key in storage.list_keys().await.unwrap() {
            storage.remove(&key).await.unwrap();
        }
        assert!(storage.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_redis_storage_round_trip_and_order() {
        let Some(url) = redis_url() else { return };
        let pool = RedisStorage::create_pool(&url).unwrap();
        let base = format!("test-{}", uuid::Uuid::new_v4());
        let storage = RedisStorage::new(pool, "tide_keypool_test:", &base, Duration::ZERO);

        storage.set("b", "1".to_string()).await.unwrap();
        storage.set("a", "2".to_string()).await.unwrap();
        storage.set("b", "3".to_string()).await.unwrap();

        assert_eq!(storage.get("b").await.unwrap().as_deref(), Some("3"));
        assert_eq!(storage.list_keys().await.unwrap(), vec!["b", "a"]);

        for key in storage.list_keys().await.unwrap() {
            storage.remove(&key).await.unwrap();
        }
        assert!(storage.list_keys().await.unwrap().is_empty());
    }
}
