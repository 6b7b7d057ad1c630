// tests/client_tests.rs

mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{options, TestPool};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tide_keypool::client::{RequestHooks, RetryOverrides};
use tide_keypool::{AppError, RateLimited, RateLimitedError, RequestError, RequestOptions};
use tokio::time::{Duration, Instant};

/// Keys handed to the operation, in call order, with the time of each call.
#[derive(Clone, Default)]
struct Calls(Arc<Mutex<Vec<(String, Instant)>>>);

impl Calls {
    fn record(&self, key: String) -> usize {
        let mut calls = self.0.lock().unwrap();
        calls.push((key, Instant::now()));
        calls.len()
    }

    fn keys(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    fn gap(&self, from: usize, to: usize) -> Duration {
        let calls = self.0.lock().unwrap();
        calls[to].1 - calls[from].1
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }
}

#[async_trait]
impl RequestHooks<String, RateLimitedError> for Recorder {
    async fn on_before_request(&self, attempt: u32, key: &str) {
        self.push(format!("before {attempt} {key}"));
    }

    async fn on_success(&self, attempt: u32, key: &str, result: &String) {
        self.push(format!("success {attempt} {key} {result}"));
    }

    async fn on_rate_limited(
        &self,
        attempt: u32,
        key: &str,
        _outcome: &RateLimited<String, RateLimitedError>,
    ) {
        self.push(format!("rate_limited {attempt} {key}"));
    }

    async fn on_error(&self, attempt: u32, key: Option<&str>, error: &RateLimitedError) {
        self.push(format!("error {attempt} {} {error}", key.unwrap_or("-")));
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_rate_limited_attempts_until_success() {
    let pool = TestPool::new(&["A", "B", "C"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let result = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    match calls.record(key) {
                        1 | 2 => Err(RateLimitedError::new("slow down")),
                        _ => Ok("forecast".to_string()),
                    }
                }
            },
            RequestOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(result, "forecast");
    assert_eq!(calls.keys(), vec!["A", "B", "C"]);
    assert!(pool.status("A").await.is_rate_limited);
    assert!(pool.status("B").await.is_rate_limited);
    let c = pool.status("C").await;
    assert_eq!(c.usage_count, 1);
    assert!(!c.is_rate_limited);
    assert_eq!(pool.status("A").await.usage_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_attempts() {
    let pool = TestPool::new(&["A", "B", "C"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let _ = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    calls.record(key);
                    Err::<String, _>(RateLimitedError::new("slow down"))
                }
            },
            RequestOptions::new().retry(RetryOverrides::default().max_attempts(3)),
        )
        .await;

    assert_eq!(calls.gap(0, 1), Duration::from_millis(25));
    assert_eq!(calls.gap(1, 2), Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_header_overrides_backoff() {
    let pool = TestPool::new(&["A", "B"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let result = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    if calls.record(key) == 1 {
                        Err(RateLimitedError::new("slow down")
                            .with_status(429)
                            .with_retry_after_secs(2))
                    } else {
                        Ok("tides".to_string())
                    }
                }
            },
            RequestOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(result, "tides");
    assert!(calls.gap(0, 1) >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts_with_last_error() {
    let pool = TestPool::new(&["A", "B", "C", "D"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let err = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    let n = calls.record(key);
                    Err::<String, _>(RateLimitedError::new(format!("rate limited on attempt {n}")))
                }
            },
            RequestOptions::new().retry(RetryOverrides::default().max_attempts(3)),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.len(), 3);
    match &err {
        RequestError::RateLimitExceeded {
            attempts,
            last: RateLimited::Error(last),
        } => {
            assert_eq!(*attempts, 3);
            assert_eq!(last.to_string(), "rate limited on attempt 3");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.operation_error().map(ToString::to_string).as_deref(),
        Some("rate limited on attempt 3")
    );
    assert!(!pool.status("D").await.is_rate_limited);
    assert_eq!(
        AppError::from(err).status_code(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_available_key_after_budget() {
    let pool = TestPool::new(&["A"], options(10)).await;
    pool.pool.mark_rate_limited("A").await.unwrap();
    let client = pool.client();
    let calls = Calls::default();
    let started = Instant::now();

    let err = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    calls.record(key);
                    Ok::<_, RateLimitedError>("unreachable".to_string())
                }
            },
            RequestOptions::new().retry(RetryOverrides::default().max_attempts(3)),
        )
        .await
        .unwrap_err();

    assert!(err.is_no_available_key());
    assert!(matches!(err, RequestError::NoAvailableKey { attempts: 3 }));
    assert_eq!(calls.len(), 0);
    assert_eq!(started.elapsed(), Duration::from_millis(25 + 50));
    assert_eq!(
        AppError::from(err).status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test(start_paused = true)]
async fn test_waiting_for_a_key_spends_the_attempt_budget() {
    let pool = TestPool::new(&["A"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    // Attempt 1 limits the only key; attempt 2 finds nothing and is the last one.
    let err = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    calls.record(key);
                    Err::<String, _>(RateLimitedError::new("slow down"))
                }
            },
            RequestOptions::new().retry(RetryOverrides::default().max_attempts(2)),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.len(), 1);
    assert!(matches!(err, RequestError::NoAvailableKey { attempts: 2 }));
}

#[tokio::test(start_paused = true)]
async fn test_other_errors_fail_immediately() {
    let pool = TestPool::new(&["A", "B"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let err = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    calls.record(key);
                    Err::<String, _>("connection reset by peer".to_string())
                }
            },
            RequestOptions::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.len(), 1);
    assert!(matches!(&err, RequestError::Failed(msg) if msg == "connection reset by peer"));
    let a = pool.status("A").await;
    assert!(!a.is_rate_limited);
    assert_eq!(a.usage_count, 0);
    assert_eq!(AppError::from(err).status_code(), StatusCode::BAD_GATEWAY);
}

#[tokio::test(start_paused = true)]
async fn test_message_based_classification() {
    let pool = TestPool::new(&["A", "B"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let result = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    if calls.record(key) == 1 {
                        Err("Daily Quota Exceeded for this key".to_string())
                    } else {
                        Ok(())
                    }
                }
            },
            RequestOptions::new(),
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(calls.keys(), vec!["A", "B"]);
    assert!(pool.status("A").await.is_rate_limited);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_result_is_retried() {
    let pool = TestPool::new(&["A", "B"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let result = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    let status = if calls.record(key) == 1 { 429 } else { 200 };
                    Ok::<_, String>(json!({ "status": status, "body": "ok" }))
                }
            },
            RequestOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(result["status"], 200);
    assert!(pool.status("A").await.is_rate_limited);
    assert_eq!(pool.status("B").await.usage_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_classifiers_replace_defaults() {
    let pool = TestPool::new(&["A", "B", "C"], options(10)).await;
    let client = pool.client();
    let calls = Calls::default();

    let result = client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    match calls.record(key) {
                        1 => Err("upstream busy".to_string()),
                        2 => Ok("busy".to_string()),
                        _ => Ok("data".to_string()),
                    }
                }
            },
            RequestOptions::new()
                .is_rate_limit_error(|e: &String| e.contains("busy"))
                .should_treat_result_as_rate_limited(|r: &String| r == "busy"),
        )
        .await
        .unwrap();

    assert_eq!(result, "data");
    assert_eq!(calls.keys(), vec!["A", "B", "C"]);

    // An overriding classifier can turn a 429 into a plain failure.
    let err = client
        .request(
            |_key| async { Err::<String, _>(RateLimitedError::new("slow").with_status(429)) },
            RequestOptions::new().is_rate_limit_error(|_: &RateLimitedError| false),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_hooks_observe_every_step() {
    let pool = TestPool::new(&["A", "B"], options(10)).await;
    let client = pool.client();
    let recorder = Recorder::default();
    let calls = Calls::default();

    client
        .request(
            |key| {
                let calls = calls.clone();
                async move {
                    if calls.record(key) == 1 {
                        Err(RateLimitedError::new("slow down"))
                    } else {
                        Ok("done".to_string())
                    }
                }
            },
            RequestOptions::<String, RateLimitedError>::new().hooks(&recorder),
        )
        .await
        .unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            "before 1 A",
            "rate_limited 1 A",
            "before 2 B",
            "success 2 B done",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempt_marks_and_notifies_once() {
    let pool = TestPool::new(&["A", "B"], options(10)).await;
    let client = pool.client();
    let recorder = Recorder::default();

    let err = client
        .request(
            |_key| async { Err::<String, _>(RateLimitedError::new("slow down")) },
            RequestOptions::<String, RateLimitedError>::new()
                .retry(RetryOverrides::default().max_attempts(2))
                .hooks(&recorder),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::RateLimitExceeded { attempts: 2, .. }));
    assert_eq!(
        recorder.events(),
        vec!["before 1 A", "rate_limited 1 A", "before 2 B", "rate_limited 2 B"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_error_hook_sees_failing_key() {
    let pool = TestPool::new(&["A"], options(10)).await;
    let client = pool.client();
    let recorder = Recorder::default();

    let _ = client
        .request(
            |_key| async {
                Err::<String, _>(RateLimitedError::new("bad request").with_status(400))
            },
            RequestOptions::<String, RateLimitedError>::new()
                .is_rate_limit_error(|e: &RateLimitedError| e.to_string().contains("slow"))
                .hooks(&recorder),
        )
        .await;

    assert_eq!(recorder.events(), vec!["before 1 A", "error 1 A bad request"]);
}

#[tokio::test(start_paused = true)]
async fn test_success_counts_toward_ceiling() {
    let pool = TestPool::new(&["A", "B"], options(2)).await;
    let client = pool.client();
    let calls = Calls::default();

    for _ in 0..4 {
        client
            .request(
                |key| {
                    let calls = calls.clone();
                    async move {
                        calls.record(key);
                        Ok::<_, String>(())
                    }
                },
                RequestOptions::new(),
            )
            .await
            .unwrap();
    }

    assert_eq!(calls.keys(), vec!["A", "B", "A", "B"]);
    assert!(pool.status("A").await.is_rate_limited);
    assert!(pool.status("B").await.is_rate_limited);

    let err = client
        .request(
            |_key| async { Ok::<_, String>(()) },
            RequestOptions::new().retry(RetryOverrides::default().max_attempts(1)),
        )
        .await
        .unwrap_err();
    assert!(err.is_no_available_key());
}

#[tokio::test]
async fn test_concurrent_requests_all_complete() {
    let pool = TestPool::new(&["A", "B", "C"], options(100)).await;
    let client = pool.client();

    let results = futures::future::join_all((0..6).map(|i| {
        let client = client.clone();
        async move {
            client
                .request(
                    move |key| async move { Ok::<_, String>(format!("{i}:{key}")) },
                    RequestOptions::new(),
                )
                .await
        }
    }))
    .await;

    let values: Vec<String> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(values.len(), 6);
    for value in &values {
        let (_, key) = value.split_once(':').unwrap();
        assert!(["A", "B", "C"].contains(&key));
    }
    // Read-then-write is not locked, so only an upper bound holds.
    let total: u64 = pool
        .pool
        .get_status()
        .await
        .unwrap()
        .iter()
        .map(|s| s.usage_count)
        .sum();
    assert!((1..=6).contains(&total));
}
