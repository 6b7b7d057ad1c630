// src/client/classify.rs

//! Rate-limit classification of operation outcomes.
//!
//! Outcomes describe their shape through [`RateLimitSignal`]; the default
//! classifiers and the `Retry-After` lookup only ever look at that shape.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use std::time::Duration;
use thiserror::Error;

const RATE_LIMIT_PHRASES: [&str; 3] = ["rate limit", "too many requests", "quota exceeded"];

const TOO_MANY_REQUESTS: u16 = 429;

/// Shape of an operation error or result, as seen by the classifiers.
///
/// Every method defaults to "not present", so a type only reports the
/// parts it actually has.
pub trait RateLimitSignal {
    /// The value is the dedicated rate-limit error type
    fn is_rate_limit_error_type(&self) -> bool {
        false
    }

    /// HTTP status carried directly by the value
    fn status(&self) -> Option<u16> {
        None
    }

    /// A response-shaped value nested inside this one
    fn response(&self) -> Option<&dyn RateLimitSignal> {
        None
    }

    /// Case-insensitive lookup in the value's own headers
    fn header(&self, _name: &str) -> Option<String> {
        None
    }

    /// Human-readable message, for substring matching
    fn message(&self) -> Option<String> {
        None
    }
}

/// Default error classifier.
///
/// Checked in order: dedicated error type, direct 429 status, nested
/// response with 429 status, message containing "rate limit",
/// "too many requests" or "quota exceeded" (case-insensitive).
pub fn is_rate_limit_error<E: RateLimitSignal + ?Sized>(error: &E) -> bool {
    if error.is_rate_limit_error_type() {
        return true;
    }
    if error.status() == Some(TOO_MANY_REQUESTS) {
        return true;
    }
    if error.response().and_then(|response| response.status()) == Some(TOO_MANY_REQUESTS) {
        return true;
    }
    error.message().is_some_and(|message| {
        let message = message.to_lowercase();
        RATE_LIMIT_PHRASES.iter().any(|phrase| message.contains(phrase))
    })
}

/// Default result classifier: a response-shaped result with status 429.
pub fn is_rate_limited_result<T: RateLimitSignal + ?Sized>(result: &T) -> bool {
    result.status() == Some(TOO_MANY_REQUESTS)
}

/// Delay requested by the provider through `Retry-After`.
///
/// Looked up on the value itself when it carries a status, otherwise on a
/// nested response, otherwise on the value's own headers.
pub fn retry_after<S: RateLimitSignal + ?Sized>(signal: &S) -> Option<Duration> {
    retry_after_at(signal, Utc::now())
}

pub(crate) fn retry_after_at<S: RateLimitSignal + ?Sized>(
    signal: &S,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let raw = if signal.status().is_some() {
        signal.header("retry-after")
    } else if let Some(response) = signal.response().filter(|r| r.status().is_some()) {
        response.header("retry-after")
    } else {
        signal.header("retry-after")
    };
    parse_retry_after(raw.as_deref()?, now)
}

/// Parses a `Retry-After` value: delay in whole seconds, or an HTTP-date
/// in the future.
///
/// A leading run of digits counts as seconds even when followed by other
/// text, so `"2.5"` waits two seconds.
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    let digits = raw
        .find(|c: char| !c.is_ascii_digit())
        .map_or(raw, |end| &raw[..end]);
    if !digits.is_empty() {
        return digits.parse::<u64>().ok().map(Duration::from_secs);
    }
    let date = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (date - now).to_std().ok().filter(|delay| !delay.is_zero())
}

fn header_from_map(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Error an operation returns to report rate limiting explicitly.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RateLimitedError {
    message: String,
    status: Option<u16>,
    headers: HeaderMap,
}

impl RateLimitedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Carries the provider's response headers, e.g. `Retry-After`.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_retry_after_secs(mut self, seconds: u64) -> Self {
        self.headers.insert(http::header::RETRY_AFTER, seconds.into());
        self
    }
}

impl RateLimitSignal for RateLimitedError {
    fn is_rate_limit_error_type(&self) -> bool {
        true
    }

    fn status(&self) -> Option<u16> {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        header_from_map(&self.headers, name)
    }

    fn message(&self) -> Option<String> {
        Some(self.message.clone())
    }
}

impl RateLimitSignal for reqwest::Response {
    fn status(&self) -> Option<u16> {
        Some(reqwest::Response::status(self).as_u16())
    }

    fn header(&self, name: &str) -> Option<String> {
        header_from_map(self.headers(), name)
    }
}

impl RateLimitSignal for reqwest::Error {
    fn status(&self) -> Option<u16> {
        reqwest::Error::status(self).map(|status| status.as_u16())
    }

    fn message(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl<B> RateLimitSignal for http::Response<B> {
    fn status(&self) -> Option<u16> {
        Some(http::Response::status(self).as_u16())
    }

    fn header(&self, name: &str) -> Option<String> {
        header_from_map(self.headers(), name)
    }
}

/// JSON objects are read structurally: numeric `status`, a `headers`
/// object, a nested `response` object and a `message` string.
impl RateLimitSignal for serde_json::Value {
    fn status(&self) -> Option<u16> {
        self.get("status")?.as_u64()?.try_into().ok()
    }

    fn response(&self) -> Option<&dyn RateLimitSignal> {
        self.get("response")
            .filter(|response| response.is_object())
            .map(|response| response as &dyn RateLimitSignal)
    }

    fn header(&self, name: &str) -> Option<String> {
        let headers = self.get("headers")?.as_object()?;
        let (_, value) = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))?;
        match value {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Number(number) => Some(number.to_string()),
            serde_json::Value::Array(values) => values.first()?.as_str().map(str::to_string),
            _ => None,
        }
    }

    fn message(&self) -> Option<String> {
        self.get("message")?.as_str().map(str::to_string)
    }
}

impl RateLimitSignal for AppError {
    fn is_rate_limit_error_type(&self) -> bool {
        matches!(self, AppError::RateLimitExceeded { .. })
    }

    fn message(&self) -> Option<String> {
        Some(self.to_string())
    }
}

/// Looks through the error chain for the known error types first, then
/// falls back to the full context chain as the message.
impl RateLimitSignal for anyhow::Error {
    fn is_rate_limit_error_type(&self) -> bool {
        self.chain()
            .filter_map(known_error)
            .any(|e| e.is_rate_limit_error_type())
    }

    fn status(&self) -> Option<u16> {
        self.chain().filter_map(known_error).find_map(|e| e.status())
    }

    fn header(&self, name: &str) -> Option<String> {
        self.chain().filter_map(known_error).find_map(|e| e.header(name))
    }

    fn message(&self) -> Option<String> {
        Some(format!("{self:#}"))
    }
}

impl RateLimitSignal for Box<dyn std::error::Error + Send + Sync> {
    fn is_rate_limit_error_type(&self) -> bool {
        known_error(self.as_ref()).is_some_and(|e| e.is_rate_limit_error_type())
    }

    fn status(&self) -> Option<u16> {
        known_error(self.as_ref()).and_then(|e| e.status())
    }

    fn header(&self, name: &str) -> Option<String> {
        known_error(self.as_ref()).and_then(|e| e.header(name))
    }

    fn message(&self) -> Option<String> {
        Some(self.to_string())
    }
}

fn known_error<'a>(error: &'a (dyn std::error::Error + 'static)) -> Option<&'a dyn RateLimitSignal> {
    if let Some(e) = error.downcast_ref::<RateLimitedError>() {
        return Some(e);
    }
    if let Some(e) = error.downcast_ref::<reqwest::Error>() {
        return Some(e);
    }
    if let Some(e) = error.downcast_ref::<AppError>() {
        return Some(e);
    }
    None
}

impl RateLimitSignal for String {
    fn message(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl RateLimitSignal for &str {
    fn message(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl RateLimitSignal for () {}
