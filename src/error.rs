//! Error taxonomy (§7). These are semantic categories, not exception types —
//! every fallible operation in the core returns one of these, and the HTTP
//! layer maps each variant to exactly one status code, once, in one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed UUID, missing field, out-of-range view/expiry/chunk-size.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Record expired, burned, or token already used. Deliberately
    /// undifferentiated: the response must not distinguish "never existed"
    /// from "already consumed" (§7).
    #[error("gone")]
    Gone,

    /// Download token absent, expired, or mismatched.
    #[error("unauthorized")]
    Unauthorized,

    /// GCM tag mismatch during decryption.
    #[error("authentication failure")]
    AuthFailure,

    /// Sliding-window rate limit exceeded; carries seconds until retry.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Blob store or metadata store backend error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl CoreError {
    fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Gone => StatusCode::NOT_FOUND,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            // A GCM auth failure is never something the HTTP layer itself
            // produces (the server never decrypts), but the crypto core
            // surfaces it with the same shape other callers expect.
            CoreError::AuthFailure => StatusCode::BAD_REQUEST,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let CoreError::Infrastructure(ref msg) = self {
            tracing::error!(error = %msg, "infrastructure error");
        }
        let body = Json(json!({ "error": self.to_string() }));
        let mut response = (status, body).into_response();
        if let CoreError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
        }
        response
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
