//! Error handling for the key pool and its HTTP surface
//!
//! - `AppError` carries every failure the pool, its storage and its
//!   configuration can produce
//! - HTTP status mapping follows RFC 7807 Problem Details
//! - key identifiers only ever appear in previewed form

pub mod types;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Standard error response format following RFC 7807 Problem Details
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// A URI reference that identifies the problem type
    #[serde(rename = "type")]
    pub error_type: String,

    /// A short, human-readable summary of the problem type
    pub title: String,

    /// The HTTP status code
    pub status: u16,

    /// A human-readable explanation specific to this occurrence
    pub detail: String,

    /// A URI reference that identifies the specific occurrence
    pub instance: String,

    /// Request ID for tracing
    pub request_id: Option<String>,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String, line: Option<usize> },

    // Storage errors
    #[error("Redis connection failed: {message}")]
    RedisConnection { message: String },

    #[error("Redis operation failed: {operation} - {message}")]
    RedisOperation { operation: String, message: String },

    #[error("Storage backend failed: {message}")]
    StorageBackend { message: String },

    // Key management
    #[error("Key {key} not found in pool")]
    KeyNotFound { key: String },

    #[error("No available API keys in pool")]
    NoAvailableKey,

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("Key pool not found: {name}")]
    PoolNotFound { name: String },

    // Upstream operation errors
    #[error("Upstream request failed: {message}")]
    Upstream { message: String },

    // System errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },
}

impl AppError {
    /// Create a new configuration validation error
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Unknown-key error with the key already previewed.
    pub fn key_not_found(key: &str) -> Self {
        Self::KeyNotFound {
            key: preview_key(key),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            Self::ConfigParse { .. } | Self::Serialization { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            Self::ConfigNotFound { .. } | Self::KeyNotFound { .. } | Self::PoolNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            // 429 Too Many Requests
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            Self::ConfigValidation { .. } | Self::Internal { .. } | Self::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 502 Bad Gateway
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            Self::NoAvailableKey
            | Self::RedisConnection { .. }
            | Self::RedisOperation { .. }
            | Self::StorageBackend { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error type URI for RFC 7807 compliance
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. } | Self::ConfigNotFound { .. } | Self::ConfigParse { .. } => {
                "https://tide-keypool.dev/errors/configuration"
            }
            Self::RedisConnection { .. }
            | Self::RedisOperation { .. }
            | Self::StorageBackend { .. } => "https://tide-keypool.dev/errors/storage",
            Self::RateLimitExceeded { .. } => "https://tide-keypool.dev/errors/rate-limit",
            Self::NoAvailableKey | Self::KeyNotFound { .. } | Self::PoolNotFound { .. } => {
                "https://tide-keypool.dev/errors/key-management"
            }
            Self::Upstream { .. } => "https://tide-keypool.dev/errors/upstream",
            _ => "https://tide-keypool.dev/errors/internal",
        }
    }

    /// Get a human-readable title for the error
    pub fn title(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. } | Self::ConfigNotFound { .. } | Self::ConfigParse { .. } => {
                "Configuration Error"
            }
            Self::RedisConnection { .. }
            | Self::RedisOperation { .. }
            | Self::StorageBackend { .. } => "Storage Error",
            Self::RateLimitExceeded { .. } => "Rate Limit Exceeded",
            Self::NoAvailableKey | Self::KeyNotFound { .. } | Self::PoolNotFound { .. } => {
                "Key Management Error"
            }
            Self::Upstream { .. } => "Upstream Error",
            _ => "Internal Server Error",
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self, request_id: Option<&str>) {
        let request_id = request_id.unwrap_or("unknown");

        if self.status_code().is_server_error() {
            error!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Application error occurred"
            );
        } else {
            warn!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        self.log(Some(&request_id));

        let status = self.status_code();
        let error_response = ErrorResponse {
            error_type: self.error_type().to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
            instance: format!("/errors/{request_id}"),
            request_id: Some(request_id),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Shortens a credential to `abcd...wxyz` for logs and error messages.
pub fn preview_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        key.to_string()
    }
}

/// Result type alias for the application
pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_maps_to_service_unavailable() {
        assert_eq!(
            AppError::NoAvailableKey.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::RateLimitExceeded { attempts: 3 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_key_not_found_never_leaks_full_key() {
        let err = AppError::key_not_found("sk-1234567890abcdef");
        let message = err.to_string();
        assert!(message.contains("sk-1...cdef"));
        assert!(!message.contains("1234567890"));
    }

    #[test]
    fn test_preview_short_key_is_kept() {
        assert_eq!(preview_key("A"), "A");
        assert_eq!(preview_key("12345678"), "12345678");
        assert_eq!(preview_key("123456789"), "1234...6789");
    }
}
