use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::lifecycle::StoreError;
use crate::matching::cache::CacheError;
use crate::models::job::JobStatus;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The account cannot cover the publication charge. Recoverable by the
    /// user (buy more tokens); never retried automatically.
    #[error("Insufficient tokens")]
    InsufficientTokens,

    /// The requested transition is not in the lifecycle table.
    #[error("Cannot {op} a job in status '{from}'")]
    InvalidStateTransition { op: &'static str, from: JobStatus },

    /// Lost a compare-and-set race, or replayed an idempotency key with a
    /// different intent.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Ledger infrastructure fault. The publish that hit it applied no
    /// partial state change; retry with backoff.
    #[error("Token ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Not implemented")]
    NotImplemented,
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(msg) => AppError::LedgerUnavailable(msg),
            LedgerError::UnknownAccount(id) => {
                AppError::NotFound(format!("Token account {id} not found"))
            }
            LedgerError::KeyReuse(key) => AppError::Conflict(format!(
                "idempotency key '{key}' was already used for a different operation"
            )),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::Conflict(id) => {
                AppError::Conflict(format!("job {id} was modified concurrently"))
            }
        }
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::InvalidScore(msg) => AppError::Validation(msg),
            CacheError::Unavailable(msg) => AppError::StoreUnavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InsufficientTokens => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_TOKENS",
                "The account does not have enough tokens for this operation".to_string(),
            ),
            AppError::InvalidStateTransition { .. } => (
                StatusCode::CONFLICT,
                "INVALID_STATE_TRANSITION",
                self.to_string(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::LedgerUnavailable(msg) => {
                tracing::error!("Ledger unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "LEDGER_UNAVAILABLE",
                    "The token ledger is temporarily unavailable; retry shortly".to_string(),
                )
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "Storage is temporarily unavailable; retry shortly".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::NotImplemented => (
                StatusCode::NOT_IMPLEMENTED,
                "NOT_IMPLEMENTED",
                "This endpoint is not yet implemented".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_tokens_maps_to_402() {
        let response = AppError::InsufficientTokens.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_invalid_transition_maps_to_409_with_context() {
        let err = AppError::InvalidStateTransition {
            op: "publish",
            from: JobStatus::Inactive,
        };
        assert_eq!(err.to_string(), "Cannot publish a job in status 'inactive'");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_ledger_unavailable_maps_to_503() {
        let err = AppError::from(LedgerError::Unavailable("connection refused".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
