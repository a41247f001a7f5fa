//! The single error enum the HTTP surface maps to status codes.
//!
//! Grounded on the teacher's `common/src/rpc/error.rs`: one `thiserror`
//! enum, boundary errors folded in with `#[from]`, and an
//! `actix_web::ResponseError` impl that owns the wire shape. There the
//! mapping always answers `200` with a JSON-RPC envelope; here each variant
//! maps to its own HTTP status, per spec §7.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: Invalid or missing API key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Quota exceeded")]
    QuotaExceeded,

    #[error("Rate limit exceeded, try again later")]
    RateLimited {
        limit: u32,
        reset_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Ledger is currently unavailable")]
    LedgerUnavailable,

    #[error("Ledger request timed out")]
    LedgerTimeout,

    #[error("Failed to persist verification record")]
    PersistenceError,

    #[error("Internal server error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::QuotaExceeded => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::LedgerTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::PersistenceError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Self::RateLimited { limit, reset_at } = self {
            builder
                .insert_header(("X-RateLimit-Limit", limit.to_string()))
                .insert_header(("X-RateLimit-Remaining", "0"))
                .insert_header(("X-RateLimit-Reset", reset_at.to_rfc3339()));
        }
        builder.json(ErrorBody {
            success: false,
            error: self.to_string(),
        })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::LedgerTimeout
        } else {
            log::warn!("ledger request failed: {err}");
            Self::LedgerUnavailable
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        log::error!("persistence error: {err}");
        Self::PersistenceError
    }
}
