//! Unified error handling for Consulta
//!
//! One error type covers domain rule violations, infrastructure failures and
//! authentication problems, with automatic HTTP response mapping.

use crate::models::NetworkQuality;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Matching Errors ====================
    #[error("No counselor is available")]
    NoAvailableCounselor,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Requester already has an open session: {0}")]
    SessionAlreadyOpen(String),

    // ==================== Billing Errors ====================
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Concurrent update conflict: {0}")]
    ConcurrencyConflict(String),

    // ==================== Network Errors ====================
    #[error("Network quality {quality} is not sufficient: {guidance}")]
    NetworkQualityInsufficient {
        quality: NetworkQuality,
        guidance: String,
    },

    // ==================== Store Errors ====================
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Authentication Errors ====================
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: insufficient permissions")]
    Forbidden,

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::InvalidToken(_) | AppError::TokenExpired => StatusCode::UNAUTHORIZED,

            // 402 Payment Required
            AppError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::Forbidden | AppError::Unauthorized(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::SessionNotFound(_) | AppError::AccountNotFound(_) | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }

            // 409 Conflict
            AppError::InvalidStateTransition(_)
            | AppError::SessionAlreadyOpen(_)
            | AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            AppError::NetworkQualityInsufficient { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 503 Service Unavailable
            AppError::NoAvailableCounselor
            | AppError::StoreUnavailable(_)
            | AppError::Pool(_)
            | AppError::CacheConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NoAvailableCounselor => "no_available_counselor",
            AppError::InvalidStateTransition(_) => "invalid_state_transition",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::SessionAlreadyOpen(_) => "session_already_open",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::ConcurrencyConflict(_) => "concurrency_conflict",
            AppError::NetworkQualityInsufficient { .. } => "network_quality_insufficient",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable(_)
                | AppError::Pool(_)
                | AppError::CacheConnection(_)
                | AppError::ConcurrencyConflict(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::NoAvailableCounselor.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::SessionNotFound("abc".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InsufficientFunds {
                required: 14_000,
                available: 5_000
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::InvalidStateTransition("stale".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::NetworkQualityInsufficient {
                quality: NetworkQuality::Poor,
                guidance: "move closer".to_string()
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::SessionAlreadyOpen("1".to_string()).error_code(),
            "session_already_open"
        );
        assert_eq!(
            AppError::ConcurrencyConflict("row".to_string()).error_code(),
            "concurrency_conflict"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::StoreUnavailable("down".to_string()).is_retryable());
        assert!(!AppError::NoAvailableCounselor.is_retryable());
        assert!(!AppError::InsufficientFunds {
            required: 1,
            available: 0
        }
        .is_retryable());
    }
}
