//! Application-wide error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// An attempted status move outside the PENDING -> PAID/FAILED table.
    /// Should never fire for a well-behaved client; logged loudly when it does.
    #[error("illegal payment transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Payment gateway rejected the request: {0}")]
    Gateway(String),

    #[error("Email dispatch failed: {0}")]
    Mail(String),

    #[error("Asset unavailable: {0}")]
    AssetUnavailable(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            StoreError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            StoreError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            StoreError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            StoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, (*msg).to_string()),
            StoreError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            StoreError::InvalidTransition { .. } => {
                error!("{self}");
                (StatusCode::CONFLICT, self.to_string())
            }
            StoreError::Gateway(msg) => {
                error!("Payment gateway rejection: {msg}");
                (StatusCode::BAD_GATEWAY, "Payment gateway error".to_string())
            }
            StoreError::Http(e) => {
                error!("Upstream request failed: {e}");
                (StatusCode::BAD_GATEWAY, "Upstream service error".to_string())
            }
            StoreError::AssetUnavailable(msg) => {
                error!("Asset unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "File temporarily unavailable".to_string(),
                )
            }
            _ => {
                error!("Internal error: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
