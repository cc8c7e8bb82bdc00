// Error taxonomy shared by the pipeline, the gateway and the HTTP layer

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Body returned for every failed request.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Stable code for programmatic handling.
    pub code: String,
    /// Whether retrying the same request later can succeed.
    pub retryable: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    ClientInput(String),

    #[error("File exceeds the maximum upload size of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Too many requests")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    #[error("Storage read failed: {0}")]
    StorageRead(String),

    #[error("File not found")]
    RecordNotFound,

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ClientInput(_) => "invalid_request",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::StorageWrite(_) => "storage_write_failed",
            Self::StorageRead(_) => "storage_read_failed",
            Self::RecordNotFound => "not_found",
            Self::Notification(_) => "notification_failed",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientInput(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RecordNotFound => StatusCode::NOT_FOUND,
            Self::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::StorageWrite(_)
            | Self::StorageRead(_)
            | Self::Notification(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. } | Self::Timeout { .. })
    }

    /// Message shown to the caller. Server-side failures are not described in detail.
    fn public_message(&self) -> String {
        match self {
            Self::StorageWrite(_) | Self::StorageRead(_) | Self::Notification(_) | Self::Internal(_) => {
                "An error occurred".to_string()
            }
            Self::Timeout { .. } => "The storage backend did not respond in time, try again".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), "Request failed: {}", self);
        }

        let body = ErrorResponse {
            error: self.public_message(),
            code: self.code().to_string(),
            retryable: self.is_retryable(),
        };
        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimitExceeded { retry_after } = &self {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::ClientInput("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::RecordNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::RateLimitExceeded { retry_after: Duration::from_secs(5) }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::StorageWrite("boom".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::PayloadTooLarge { limit: 10 }.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_retryable_split() {
        assert!(AppError::RateLimitExceeded { retry_after: Duration::ZERO }.is_retryable());
        assert!(AppError::Timeout { operation: "blob put", after: Duration::from_secs(1) }.is_retryable());
        assert!(!AppError::ClientInput("bad".into()).is_retryable());
        assert!(!AppError::RecordNotFound.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_response_sets_retry_after() {
        let response = AppError::RateLimitExceeded { retry_after: Duration::from_secs(42) }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, "rate_limited");
        assert!(parsed.retryable);
    }

    #[tokio::test]
    async fn test_internal_details_are_not_exposed() {
        let response = AppError::StorageRead("bucket credentials rejected".into()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "An error occurred");
        assert!(!parsed.retryable);
    }
}
