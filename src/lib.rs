// src/lib.rs

//! API key pooling for rate-limited upstream providers.
//!
//! A [`KeyPool`] hands out the least-used available key of a pool and
//! tracks usage and rate-limit state in a shared [`KeyStatusStore`].
//! [`KeyPoolClient::request`] wraps a caller's operation with key
//! acquisition, outcome classification and backoff retries.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod key_pool;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod storage;

use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub use client::{KeyPoolClient, RateLimited, RateLimitedError, RequestError, RequestOptions};
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use key_pool::{KeyPool, KeyPoolOptions};
pub use registry::PoolRegistry;
pub use server::ServerState;
pub use storage::{ApiKey, KeyPoolStore, KeyStatus, KeyStatusStore, KeyStatusUpdate, KvStorage, MemoryStorage};

/// Loads configuration, builds the pool registry and the status router.
pub async fn run(config_path_override: Option<PathBuf>) -> Result<(Router, AppConfig)> {
    info!("Starting key pool service...");

    let config_path = resolve_config_path(config_path_override);
    let app_config = config::load_config(&config_path).map_err(|e| {
        error!(
            config.path = %config_path.display(),
            error = ?e,
            "Failed to load or validate configuration. Exiting."
        );
        e
    })?;

    let pool_names: Vec<&str> = app_config.pools.iter().map(|p| p.name.as_str()).collect();
    info!(
        config.pools.count = app_config.pools.len(),
        config.pools.names = ?pool_names,
        server.port = app_config.server.port,
        "Configuration loaded and validated successfully."
    );

    let registry = PoolRegistry::from_config(&app_config).await?;
    let state = ServerState::new(registry);

    #[cfg(feature = "metrics")]
    let state = match metrics::install_recorder() {
        Ok(handle) => state.with_metrics(handle),
        Err(e) => {
            error!(error = %e, "Metrics disabled");
            state
        }
    };

    Ok((server::create_router(Arc::new(state)), app_config))
}

/// `--config` flag, then `CONFIG_PATH`, then `config.yaml`.
pub fn resolve_config_path(config_path_override: Option<PathBuf>) -> PathBuf {
    config_path_override.unwrap_or_else(|| {
        std::env::var("CONFIG_PATH").map_or_else(|_| PathBuf::from("config.yaml"), PathBuf::from)
    })
}
