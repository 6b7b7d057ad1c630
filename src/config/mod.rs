// src/config/mod.rs

pub mod app;
pub mod loader;
pub mod validation;

pub use app::{parse_key_list, AppConfig, PoolConfig, RetryConfig, ServerConfig, StorageConfig};
pub use loader::load_config;
pub use validation::ConfigValidator;
