//! Common test utilities and fixtures

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tide_keypool::client::RetryOptions;
use tide_keypool::{
    ApiKey, KeyPool, KeyPoolClient, KeyPoolOptions, KeyPoolStore, KeyStatus, KeyStatusStore,
    MemoryStorage,
};

pub fn keys(list: &[&str]) -> Vec<ApiKey> {
    list.iter().map(|k| k.to_string()).collect()
}

/// Pool over fresh in-memory storage, plus its store for direct inspection.
pub struct TestPool {
    pub store: Arc<KeyPoolStore>,
    pub pool: KeyPool,
}

impl TestPool {
    pub async fn new(initial: &[&str], options: KeyPoolOptions) -> Self {
        let storage = Arc::new(MemoryStorage::new("test-pool", Duration::ZERO));
        let store = Arc::new(KeyPoolStore::new(storage));
        let pool = KeyPool::new("test-pool", store.clone(), options);
        pool.initialize(&keys(initial)).await.unwrap();
        Self { store, pool }
    }

    pub async fn status(&self, key: &str) -> KeyStatus {
        self.store
            .get_key_status(key)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no status for {key}"))
    }

    /// Client without jitter so delays are exact.
    pub fn client(&self) -> KeyPoolClient {
        KeyPoolClient::new(self.pool.clone()).with_retry_defaults(RetryOptions {
            jitter_ratio: 0.0,
            ..RetryOptions::default()
        })
    }
}

pub fn options(max_requests_per_key: u64) -> KeyPoolOptions {
    KeyPoolOptions {
        max_requests_per_key,
        ..KeyPoolOptions::default()
    }
}
