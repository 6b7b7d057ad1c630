//! Key pool metrics
//!
//! Recorded through the `metrics` crate facade when the `metrics`
//! feature is enabled; every function is a no-op otherwise. Nothing is
//! exported until a recorder is installed (see [`exporters`]).

#[cfg(feature = "metrics")]
pub mod exporters;
#[cfg(feature = "metrics")]
pub use exporters::{install_recorder, metrics_handler};

pub const REQUESTS_TOTAL: &str = "key_pool_requests_total";
pub const RATE_LIMITED_TOTAL: &str = "key_pool_rate_limited_total";
pub const NO_KEY_TOTAL: &str = "key_pool_no_key_total";
pub const REQUEST_ATTEMPTS: &str = "key_pool_request_attempts";

/// Records the end of a pooled request and the attempts it took.
///
/// `outcome` is one of `success`, `error`, `rate_limited` or
/// `no_available_key`.
pub fn record_request(pool: &str, outcome: &'static str, attempts: u32) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!(REQUESTS_TOTAL, "pool" => pool.to_string(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!(REQUEST_ATTEMPTS, "pool" => pool.to_string()).record(f64::from(attempts));
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (pool, outcome, attempts);
}

/// Records one attempt classified as rate limited.
pub fn record_rate_limited(pool: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(RATE_LIMITED_TOTAL, "pool" => pool.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = pool;
}

/// Records a request that gave up waiting for a free key.
pub fn record_no_available_key(pool: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(NO_KEY_TOTAL, "pool" => pool.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = pool;
}
