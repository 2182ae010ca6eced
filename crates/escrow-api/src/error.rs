//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps the engine's error taxonomy onto HTTP status codes with a JSON body
//! of the form `{"error": {"code", "message"}}`. Internal and upstream
//! error details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use escrow_core::EscrowError;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "STATE_CONFLICT").
    pub code: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Unknown escrow, dispute or transaction (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request failed a domain validation rule (400).
    #[error("validation error: {0}")]
    Validation(String),

    /// Body, path or query could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No caller identity on the request (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller not permitted to perform the operation (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Illegal transition, amount conflict or lost version race (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Settlement rail failure (502). Message is logged but not returned.
    #[error("upstream gateway error: {0}")]
    Upstream(String),

    /// A dependency is not ready (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500). Message is logged but not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "AUTHORIZATION_ERROR"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "STATE_CONFLICT"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::Upstream(_) => "The settlement gateway failed".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::Upstream(_) => tracing::error!(error = %self, "upstream gateway error"),
            Self::ServiceUnavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<EscrowError> for AppError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::Validation(msg) => Self::Validation(msg),
            EscrowError::Canonicalization(e) => Self::Validation(e.to_string()),
            EscrowError::Authorization(msg) => Self::Forbidden(msg),
            EscrowError::StateConflict(conflict) => Self::Conflict(conflict.to_string()),
            EscrowError::Gateway(msg) => Self::Upstream(msg),
            EscrowError::NotFound(msg) => Self::NotFound(msg),
            EscrowError::Storage(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::StateConflict;
    use http_body_util::BodyExt;

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (EscrowError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (EscrowError::Authorization("x".into()), StatusCode::FORBIDDEN),
            (
                EscrowError::from(StateConflict::Blocked("x".into())),
                StatusCode::CONFLICT,
            ),
            (EscrowError::Gateway("x".into()), StatusCode::BAD_GATEWAY),
            (EscrowError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (EscrowError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let (status, _) = AppError::from(err).status_and_code();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn version_mismatch_is_a_conflict() {
        let err = EscrowError::from(StateConflict::VersionMismatch {
            expected: 2,
            actual: 3,
        });
        let app = AppError::from(err);
        assert!(matches!(app, AppError::Conflict(ref m) if m.contains("version mismatch")));
    }

    #[tokio::test]
    async fn conflict_body_carries_code_and_message() {
        let (status, body) = response_parts(AppError::Conflict(
            "operation cancel is not permitted in state ACTIVE".into(),
        ))
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error.code, "STATE_CONFLICT");
        assert!(body.error.message.contains("cancel"));
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let (status, body) = response_parts(AppError::Internal("db password rejected".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert!(!body.error.message.contains("password"));
    }

    #[tokio::test]
    async fn upstream_hides_details() {
        let (status, body) = response_parts(AppError::Upstream("rail token expired".into())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body.error.message.contains("token"));
    }

    #[tokio::test]
    async fn bad_request_is_400() {
        let (status, body) = response_parts(AppError::BadRequest("expected value at line 1".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.code, "BAD_REQUEST");
    }
}
