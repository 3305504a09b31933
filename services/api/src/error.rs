//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the HTTP
//! rendering of production failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use production_core::{ProductionError, RecoveryAction};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::ConfigError;
use production_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// JSON body of every rejected production request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `quota_exceeded`.
    pub error: String,
    pub message: String,
    /// What the client should offer the user next.
    #[schema(value_type = String)]
    pub recovery: RecoveryAction,
}

/// A `ProductionError` on its way out of a handler.
#[derive(Debug)]
pub struct Rejection(pub ProductionError);

impl From<ProductionError> for Rejection {
    fn from(e: ProductionError) -> Self {
        Self(e)
    }
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ProductionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProductionError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProductionError::OutOfWindow { .. } => StatusCode::FORBIDDEN,
            ProductionError::MissingFaceAsset => StatusCode::NOT_FOUND,
            ProductionError::StaleSession => StatusCode::GONE,
            ProductionError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProductionError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProductionError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProductionError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            // Already a safe, generic message.
            ProductionError::Backend(msg) | ProductionError::Transport(msg) => msg.clone(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.0.code().to_string(),
            message,
            recovery: self.0.recovery(),
        };
        (status, Json(body)).into_response()
    }
}
