//! Engine error types with HTTP status code mapping.
//!
//! [`AccrualError`] is the central error type. Each variant maps to a specific
//! HTTP status code and structured JSON error response; the scheduler also
//! uses [`AccrualError::is_transient`] to decide whether a failed tick is
//! retried.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4001,
///     "message": "insufficient funds: requested 500, available 120",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Engine error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request             |
/// | 2000–2999 | Not Found       | 404 Not Found               |
/// | 3000–3999 | Server/Storage  | 500 / 503                   |
/// | 4000–4999 | Funds           | 422 Unprocessable Entity    |
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// Requested amount exceeds the source wallet bucket.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Amount requested.
        requested: Decimal,
        /// Amount available in the source bucket.
        available: Decimal,
    },

    /// Active deposit with the given ID was not found.
    #[error("deposit not found: {0}")]
    DepositNotFound(uuid::Uuid),

    /// Pending transaction with the given ID was not found.
    #[error("transaction not found: {0}")]
    TransactionNotFound(uuid::Uuid),

    /// Wallet with the given ID was not found.
    #[error("wallet not found: {0}")]
    WalletNotFound(uuid::Uuid),

    /// User was not found (by id or username).
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Plan with the given name is not in the catalog.
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Retryable storage failure (connection loss, pool exhaustion,
    /// serialization conflict).
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// Non-retryable persistence failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Notification dispatch failed. Never reverses a financial mutation.
    #[error("notification error: {0}")]
    Notification(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccrualError {
    /// Returns `true` if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::DepositNotFound(_) => 2001,
            Self::TransactionNotFound(_) => 2002,
            Self::WalletNotFound(_) => 2003,
            Self::UserNotFound(_) => 2004,
            Self::PlanNotFound(_) => 2005,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::TransientStorage(_) => 3002,
            Self::Notification(_) => 3003,
            Self::InsufficientFunds { .. } => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::DepositNotFound(_)
            | Self::TransactionNotFound(_)
            | Self::WalletNotFound(_)
            | Self::UserNotFound(_)
            | Self::PlanNotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TransientStorage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PersistenceError(_) | Self::Notification(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for AccrualError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::TransientStorage(err.to_string()),
            // serialization_failure / deadlock_detected
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                Self::TransientStorage(err.to_string())
            }
            _ => Self::PersistenceError(err.to_string()),
        }
    }
}

impl IntoResponse for AccrualError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insufficient_funds_maps_to_422() {
        let err = AccrualError::InsufficientFunds {
            requested: dec!(500),
            available: dec!(120),
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code(), 4001);
        assert_eq!(
            err.to_string(),
            "insufficient funds: requested 500, available 120"
        );
    }

    #[test]
    fn only_transient_storage_is_retryable() {
        assert!(AccrualError::TransientStorage("reset".to_string()).is_transient());
        assert!(!AccrualError::PersistenceError("constraint".to_string()).is_transient());
        assert!(!AccrualError::DepositNotFound(uuid::Uuid::new_v4()).is_transient());
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert!(AccrualError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!AccrualError::from(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn response_carries_status() {
        let response = AccrualError::PlanNotFound("gold".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
