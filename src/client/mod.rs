// src/client/mod.rs

//! Pooled request client: acquire a key, run the caller's operation,
//! classify the outcome, then retry or return.

pub mod classify;
pub mod hooks;
pub mod retry;

pub use classify::{
    is_rate_limit_error, is_rate_limited_result, parse_retry_after, retry_after, RateLimitSignal,
    RateLimitedError,
};
pub use hooks::{NoHooks, RequestHooks};
pub use retry::{RetryOptions, RetryOverrides};

use crate::error::{preview_key, AppError, Result};
use crate::key_pool::KeyPool;
use crate::metrics;
use crate::storage::ApiKey;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// The outcome that caused an attempt to be treated as rate limited.
#[derive(Debug)]
pub enum RateLimited<T, E> {
    /// The operation failed with a rate-limit error
    Error(E),
    /// The operation succeeded with a result flagged as rate limited
    Result(T),
}

impl<T: RateLimitSignal, E: RateLimitSignal> RateLimited<T, E> {
    /// Provider-requested delay carried by the outcome, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimited::Error(error) => classify::retry_after(error),
            RateLimited::Result(result) => classify::retry_after(result),
        }
    }
}

/// Failure of [`KeyPoolClient::request`].
#[derive(Debug)]
pub enum RequestError<T, E> {
    /// No key became available within the attempt budget
    NoAvailableKey { attempts: u32 },
    /// The operation failed with an error not classified as rate limiting
    Failed(E),
    /// Every attempt was rate limited; `last` is the final attempt's outcome
    RateLimitExceeded { attempts: u32, last: RateLimited<T, E> },
    /// Reading or writing key status failed
    Store(AppError),
}

impl<T, E> RequestError<T, E> {
    pub fn is_no_available_key(&self) -> bool {
        matches!(self, RequestError::NoAvailableKey { .. })
    }

    /// The operation error behind a failure, if there is one.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            RequestError::Failed(error)
            | RequestError::RateLimitExceeded {
                last: RateLimited::Error(error),
                ..
            } => Some(error),
            _ => None,
        }
    }
}

impl<T, E: fmt::Display> fmt::Display for RequestError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::NoAvailableKey { attempts } => {
                write!(f, "No available API keys in pool after {attempts} attempts")
            }
            RequestError::Failed(error) => write!(f, "{error}"),
            RequestError::RateLimitExceeded {
                attempts,
                last: RateLimited::Error(error),
            } => write!(f, "Rate limit exceeded after {attempts} attempts: {error}"),
            RequestError::RateLimitExceeded {
                attempts,
                last: RateLimited::Result(_),
            } => write!(
                f,
                "Rate limit exceeded after {attempts} attempts: rate limited result"
            ),
            RequestError::Store(error) => write!(f, "Key pool storage failed: {error}"),
        }
    }
}

impl<T, E> std::error::Error for RequestError<T, E>
where
    T: fmt::Debug,
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::Failed(error)
            | RequestError::RateLimitExceeded {
                last: RateLimited::Error(error),
                ..
            } => Some(error),
            RequestError::Store(error) => Some(error),
            _ => None,
        }
    }
}

impl<T, E: fmt::Display> From<RequestError<T, E>> for AppError {
    fn from(err: RequestError<T, E>) -> Self {
        match err {
            RequestError::NoAvailableKey { .. } => AppError::NoAvailableKey,
            RequestError::RateLimitExceeded { attempts, .. } => {
                AppError::RateLimitExceeded { attempts }
            }
            RequestError::Failed(error) => AppError::Upstream {
                message: error.to_string(),
            },
            RequestError::Store(error) => error,
        }
    }
}

type Classifier<'a, V> = Box<dyn Fn(&V) -> bool + Send + Sync + 'a>;

/// Per-call overrides of [`KeyPoolClient::request`].
pub struct RequestOptions<'a, T, E> {
    pub retry: RetryOverrides,
    pub is_rate_limit_error: Option<Classifier<'a, E>>,
    pub should_treat_result_as_rate_limited: Option<Classifier<'a, T>>,
    pub hooks: Option<&'a dyn RequestHooks<T, E>>,
}

impl<T, E> Default for RequestOptions<'_, T, E> {
    fn default() -> Self {
        Self {
            retry: RetryOverrides::default(),
            is_rate_limit_error: None,
            should_treat_result_as_rate_limited: None,
            hooks: None,
        }
    }
}

impl<'a, T, E> RequestOptions<'a, T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, retry: RetryOverrides) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the default error classifier.
    pub fn is_rate_limit_error(mut self, classify: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.is_rate_limit_error = Some(Box::new(classify));
        self
    }

    /// Replaces the default result classifier.
    pub fn should_treat_result_as_rate_limited(
        mut self,
        classify: impl Fn(&T) -> bool + Send + Sync + 'a,
    ) -> Self {
        self.should_treat_result_as_rate_limited = Some(Box::new(classify));
        self
    }

    pub fn hooks(mut self, hooks: &'a dyn RequestHooks<T, E>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

/// [`KeyPool`] with a retrying `request` helper.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use tide_keypool::{KeyPool, KeyPoolClient, KeyPoolOptions, KeyPoolStore, MemoryStorage};
/// # use tide_keypool::client::{RequestOptions, RetryOverrides};
/// # async fn demo() -> anyhow::Result<()> {
/// let storage = Arc::new(MemoryStorage::new("stormglass", Duration::ZERO));
/// let store = Arc::new(KeyPoolStore::new(storage));
/// let pool = KeyPool::new("stormglass", store, KeyPoolOptions::default());
/// let client = KeyPoolClient::new(pool);
/// client.initialize(&["key1".to_string(), "key2".to_string()]).await?;
///
/// let body = client
///     .request(
///         |key| async move {
///             reqwest::get(format!("https://api.example.com/tides?key={key}"))
///                 .await?
///                 .error_for_status()?
///                 .text()
///                 .await
///         },
///         RequestOptions::new().retry(RetryOverrides::default().max_attempts(5)),
///     )
///     .await?;
/// # let _ = body;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct KeyPoolClient {
    pool: KeyPool,
    retry: RetryOptions,
}

impl KeyPoolClient {
    pub fn new(pool: KeyPool) -> Self {
        Self {
            pool,
            retry: RetryOptions::default(),
        }
    }

    /// Replaces the retry policy used when a call gives no overrides.
    pub fn with_retry_defaults(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    pub fn retry_defaults(&self) -> &RetryOptions {
        &self.retry
    }

    pub async fn initialize(&self, keys: &[ApiKey]) -> Result<()> {
        self.pool.initialize(keys).await
    }

    /// Runs `operation` with a pooled key until it succeeds, fails with a
    /// non-rate-limit error, or the attempt budget runs out.
    ///
    /// Waiting for a free key and retrying after a rate-limited attempt
    /// draw on the same attempt counter. A `Retry-After` on the
    /// rate-limited outcome replaces the computed backoff.
    pub async fn request<T, E, F, Fut>(
        &self,
        mut operation: F,
        options: RequestOptions<'_, T, E>,
    ) -> std::result::Result<T, RequestError<T, E>>
    where
        F: FnMut(ApiKey) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: RateLimitSignal + Send + Sync,
        E: RateLimitSignal + Send + Sync,
    {
        let retry = self.retry.merged(&options.retry);
        let hooks: &dyn RequestHooks<T, E> = options.hooks.unwrap_or(&NoHooks);
        let is_rate_limit_error = |error: &E| match &options.is_rate_limit_error {
            Some(classify) => classify(error),
            None => classify::is_rate_limit_error(error),
        };
        let is_rate_limited_result = |result: &T| match &options.should_treat_result_as_rate_limited {
            Some(classify) => classify(result),
            None => classify::is_rate_limited_result(result),
        };
        let pool_name = self.pool.name();

        let mut attempt: u32 = 1;
        loop {
            let key = loop {
                match self.pool.get_available_key().await.map_err(RequestError::Store)? {
                    Some(key) => break key,
                    None if attempt >= retry.max_attempts => {
                        warn!(pool = pool_name, attempt, "No API key became available");
                        metrics::record_no_available_key(pool_name);
                        metrics::record_request(pool_name, "no_available_key", attempt);
                        return Err(RequestError::NoAvailableKey { attempts: attempt });
                    }
                    None => {
                        let delay = retry.compute_delay(attempt);
                        debug!(
                            pool = pool_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "No API key available, waiting"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            };

            hooks.on_before_request(attempt, &key).await;

            let outcome = match operation(key.clone()).await {
                Ok(result) if is_rate_limited_result(&result) => RateLimited::Result(result),
                Ok(result) => {
                    self.pool
                        .record_success(&key)
                        .await
                        .map_err(RequestError::Store)?;
                    hooks.on_success(attempt, &key, &result).await;
                    metrics::record_request(pool_name, "success", attempt);
                    return Ok(result);
                }
                Err(error) if is_rate_limit_error(&error) => RateLimited::Error(error),
                Err(error) => {
                    hooks.on_error(attempt, Some(&key), &error).await;
                    metrics::record_request(pool_name, "error", attempt);
                    return Err(RequestError::Failed(error));
                }
            };

            self.pool
                .mark_rate_limited(&key)
                .await
                .map_err(RequestError::Store)?;
            metrics::record_rate_limited(pool_name);
            hooks.on_rate_limited(attempt, &key, &outcome).await;

            if attempt >= retry.max_attempts {
                warn!(
                    pool = pool_name,
                    api_key.preview = %preview_key(&key),
                    attempt,
                    "Rate limited on every attempt, giving up"
                );
                metrics::record_request(pool_name, "rate_limited", attempt);
                return Err(RequestError::RateLimitExceeded {
                    attempts: attempt,
                    last: outcome,
                });
            }

            let delay = outcome
                .retry_after()
                .unwrap_or_else(|| retry.compute_delay(attempt));
            debug!(
                pool = pool_name,
                api_key.preview = %preview_key(&key),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Attempt was rate limited, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
