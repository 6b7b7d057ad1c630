// src/client/hooks.rs

use crate::client::RateLimited;
use async_trait::async_trait;

/// Observer of a `request` call. Hooks are awaited before the request
/// continues and cannot change its outcome.
#[async_trait]
pub trait RequestHooks<T, E>: Send + Sync
where
    T: Send + Sync,
    E: Send + Sync,
{
    /// Called after a key is acquired, right before the operation runs
    async fn on_before_request(&self, _attempt: u32, _key: &str) {}

    /// Called once the successful use has been recorded
    async fn on_success(&self, _attempt: u32, _key: &str, _result: &T) {}

    /// Called after the key has been marked rate limited
    async fn on_rate_limited(&self, _attempt: u32, _key: &str, _outcome: &RateLimited<T, E>) {}

    /// Called before a non-rate-limit failure is returned
    async fn on_error(&self, _attempt: u32, _key: Option<&str>, _error: &E) {}
}

/// Hooks that observe nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<T, E> RequestHooks<T, E> for NoHooks
where
    T: Send + Sync,
    E: Send + Sync,
{
}
