use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A lifecycle transition was attempted from a state that forbids it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Evidence submission attempted before the pack reached READY.
    #[error("Evidence not ready: {0}")]
    EvidenceNotReady(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Outbound call to the payment provider failed. Always retryable;
    /// local state is never modified when this is returned.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared message constants so handlers and queries agree on wording.
pub mod msg {
    pub const CHANNEL_NOT_FOUND: &str = "Channel not found";
    pub const DISPUTE_NOT_FOUND: &str = "Dispute not found";
    pub const EVIDENCE_NOT_FOUND: &str = "Evidence pack not found";
    pub const ORDER_NOT_FOUND: &str = "Order not found";
    pub const PAYOUT_NOT_FOUND: &str = "Payout not found";
    pub const TRANSACTION_NOT_FOUND: &str = "Provider transaction not found";
    pub const DISCREPANCY_NOT_FOUND: &str = "Discrepancy not found";
    pub const ACCOUNT_NOT_FOUND: &str = "Account not found";
}

/// Convert `Ok(None)` lookups into `NotFound` errors without a match block.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for std::result::Result<Option<T>, AppError> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self?.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "Validation error", Some(msg.clone()))
            }
            AppError::InvalidState(msg) => {
                (StatusCode::CONFLICT, "Invalid state", Some(msg.clone()))
            }
            AppError::EvidenceNotReady(msg) => {
                (StatusCode::CONFLICT, "Evidence not ready", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::Provider(msg) => {
                tracing::warn!("Provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Provider error", Some(msg.clone()))
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for AppError {
    fn from(rejection: axum::extract::rejection::PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
