// src/config/app.rs

use crate::client::RetryOptions;
use crate::key_pool::KeyPoolOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// One named key pool, usually one per upstream provider.
#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct PoolConfig {
    /// Pool name, also the storage namespace of its key records
    pub name: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Environment variable holding comma-separated keys
    #[serde(default)]
    pub api_keys_env: Option<String>,
    #[serde(default = "default_max_requests_per_key")]
    pub max_requests_per_key: u64,
    #[serde(default = "default_cool_down_period_ms")]
    pub cool_down_period_ms: u64,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_keys: Vec::new(),
            api_keys_env: None,
            max_requests_per_key: default_max_requests_per_key(),
            cool_down_period_ms: default_cool_down_period_ms(),
        }
    }

    pub fn options(&self) -> KeyPoolOptions {
        KeyPoolOptions {
            max_requests_per_key: self.max_requests_per_key,
            cool_down_period: Duration::from_millis(self.cool_down_period_ms),
        }
    }

    /// Keys listed in the file followed by keys from `api_keys_env`.
    /// Duplicates keep their first position.
    pub fn resolve_keys(&self) -> Vec<String> {
        let from_env = self
            .api_keys_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();

        let mut keys: Vec<String> = Vec::with_capacity(self.api_keys.len() + from_env.len());
        for key in self.api_keys.iter().cloned().chain(from_env) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// Splits a comma-separated key list, trimming entries and dropping empty ones.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            test_mode: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct StorageConfig {
    /// Redis is used when set; otherwise key state lives in process memory
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_redis_key_prefix")]
    pub redis_key_prefix: String,
    /// Expiry applied to every key record write; 0 disables expiry
    #[serde(default)]
    pub ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_key_prefix: default_redis_key_prefix(),
            ttl_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryConfig {
    pub fn options(&self) -> RetryOptions {
        RetryOptions {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_pools")]
    pub pools: Vec<PoolConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            retry: RetryConfig::default(),
            pools: default_pools(),
        }
    }
}

impl AppConfig {
    pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|pool| pool.name == name)
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_redis_key_prefix() -> String {
    "key-pool:".to_string()
}

fn default_max_requests_per_key() -> u64 {
    KeyPoolOptions::default().max_requests_per_key
}

fn default_cool_down_period_ms() -> u64 {
    DAY_MS
}

fn default_max_attempts() -> u32 {
    RetryOptions::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    25
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_jitter_ratio() -> f64 {
    RetryOptions::default().jitter_ratio
}

/// The weather and tide providers the service runs against.
fn default_pools() -> Vec<PoolConfig> {
    vec![
        PoolConfig {
            api_keys_env: Some("OPEN_WEATHER_MAP_API_KEY".to_string()),
            max_requests_per_key: 1000,
            ..PoolConfig::new("open-weather-map")
        },
        PoolConfig {
            api_keys_env: Some("STORM_GLASS_API_KEY".to_string()),
            max_requests_per_key: 10,
            ..PoolConfig::new("stormglass")
        },
    ]
}
