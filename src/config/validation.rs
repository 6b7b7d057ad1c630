// src/config/validation.rs

use crate::config::{AppConfig, PoolConfig};
use crate::error::{preview_key, AppError, Result};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        if let Err(e) = Self::validate_pools(config) {
            warn!("Pool validation failed: {}", e);
            return Err(e);
        }

        if let Err(e) = Self::validate_retry_config(config) {
            warn!("Retry config validation failed: {}", e);
            return Err(e);
        }

        if let Err(e) = Self::validate_storage_config(config) {
            warn!("Storage config validation failed: {}", e);
            return Err(e);
        }

        if let Err(e) = Self::validate_server_config(config) {
            warn!("Server config validation failed: {}", e);
            return Err(e);
        }

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_pools(config: &AppConfig) -> Result<()> {
        let mut pool_names = HashSet::new();

        for pool in &config.pools {
            if pool.name.trim().is_empty() {
                return Err(AppError::config_validation(
                    "Pool name cannot be empty",
                    Some("pools.name"),
                ));
            }
            // pool names become Redis key segments separated by ':' and '#'
            if pool.name.contains([':', '#']) {
                return Err(AppError::config_validation(
                    format!("Pool name cannot contain ':' or '#': {}", pool.name),
                    Some("pools.name"),
                ));
            }
            if !pool_names.insert(&pool.name) {
                return Err(AppError::config_validation(
                    format!("Duplicate pool name: {}", pool.name),
                    Some("pools.name"),
                ));
            }
            Self::validate_pool(pool)?;
        }

        debug!("Validated {} pools", config.pools.len());
        Ok(())
    }

    fn validate_pool(pool: &PoolConfig) -> Result<()> {
        if pool.max_requests_per_key == 0 {
            return Err(AppError::config_validation(
                format!("Pool '{}': max_requests_per_key must be at least 1", pool.name),
                Some("pools.max_requests_per_key"),
            ));
        }

        let mut keys = HashSet::new();
        for key in &pool.api_keys {
            if !keys.insert(key) {
                return Err(AppError::config_validation(
                    format!("Duplicate API key in pool '{}': {}", pool.name, preview_key(key)),
                    Some("pools.api_keys"),
                ));
            }
        }

        if pool.api_keys.is_empty() && pool.api_keys_env.is_none() {
            warn!("Pool '{}' has no API keys configured", pool.name);
        }
        Ok(())
    }

    fn validate_retry_config(config: &AppConfig) -> Result<()> {
        let retry = &config.retry;
        if retry.max_attempts == 0 {
            return Err(AppError::config_validation(
                "max_attempts must be at least 1",
                Some("retry.max_attempts"),
            ));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(AppError::config_validation(
                format!(
                    "base_delay_ms ({}) cannot exceed max_delay_ms ({})",
                    retry.base_delay_ms, retry.max_delay_ms
                ),
                Some("retry.base_delay_ms"),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_ratio) {
            return Err(AppError::config_validation(
                format!("jitter_ratio must be within [0, 1], got {}", retry.jitter_ratio),
                Some("retry.jitter_ratio"),
            ));
        }
        Ok(())
    }

    fn validate_storage_config(config: &AppConfig) -> Result<()> {
        if let Some(redis_url) = &config.storage.redis_url {
            Url::parse(redis_url).map_err(|e| {
                AppError::config_validation(
                    format!("Invalid URL in redis_url: {redis_url} - {e}"),
                    Some("storage.redis_url"),
                )
            })?;
        }
        Ok(())
    }

    fn validate_server_config(config: &AppConfig) -> Result<()> {
        // Port 0 lets the OS pick one, only useful in tests
        if config.server.port == 0 && !config.server.test_mode {
            return Err(AppError::config_validation(
                "Server port cannot be 0 (except in test mode)",
                Some("server.port"),
            ));
        }
        Ok(())
    }
}
