//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping pipeline errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use framegate_core::error::FramegateError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 429 Too Many Requests - camera queue is full.
    TooManyRequests {
        message: String,
        camera_id: String,
        limit: u64,
    },
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - analyzer not configured.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::TooManyRequests {
                message,
                camera_id,
                limit,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "queue_full",
                message,
                Some(serde_json::json!({ "camera_id": camera_id, "limit": limit })),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg, None)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<FramegateError> for ApiError {
    fn from(err: FramegateError) -> Self {
        match err {
            FramegateError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            FramegateError::InvalidInput(msg) => ApiError::BadRequest(msg),
            FramegateError::QueueFull { camera_id, limit } => {
                let message =
                    format!("Queue full for camera {}: {} frames pending", camera_id, limit);
                ApiError::TooManyRequests {
                    message,
                    camera_id,
                    limit,
                }
            }
            FramegateError::Config(msg) => ApiError::ServiceUnavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (FramegateError::not_found("frame", "x"), StatusCode::NOT_FOUND),
            (
                FramegateError::InvalidInput("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                FramegateError::QueueFull {
                    camera_id: "cam".to_string(),
                    limit: 3,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                FramegateError::Config("no key".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                FramegateError::Storage("disk".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let resp = ApiError::from(err).into_response();
            assert_eq!(resp.status(), expected);
        }
    }
}
