// src/storage/mod.rs

pub mod key_status;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
pub mod traits;

pub use key_status::{ApiKey, KeyStatus, KeyStatusUpdate};
pub use memory::MemoryStorage;
#[cfg(feature = "redis")]
pub use redis::RedisStorage;
pub use store::KeyPoolStore;
pub use traits::{KeyStatusStore, KvStorage};
