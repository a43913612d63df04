use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing, garbled or non-matching credentials.
    #[error("Unauthorized")]
    Unauthorized,

    /// Unknown user while registration is closed, or another policy refusal.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unique key already taken.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed request or missing required field.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No record for the requested key.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An e-book container could not be read.
    #[error("Cannot extract metadata from {}: {reason}", path.display())]
    Extraction {
        /// File the failure belongs to.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The request was abandoned before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Build an extraction error attributed to `path`.
    pub fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AppError::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            AppError::Extraction { .. }
            | AppError::Io(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// kosync error code, as understood by KOReader.
    fn code(&self) -> u16 {
        match self {
            AppError::Unauthorized => 2001,
            AppError::Conflict(_) => 2002,
            AppError::BadRequest(_) => 2003,
            AppError::Forbidden(_) => 2005,
            AppError::NotFound(_) => 2006,
            _ => 2000,
        }
    }

    /// Message safe to hand to the client.
    fn public_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::Cancelled => "Request cancelled".to_string(),
            _ => "Unknown server error".to_string(),
        }
    }

    /// Whether the failure is ours rather than the caller's.
    pub fn is_server_fault(&self) -> bool {
        self.status().is_server_error()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_server_fault() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.public_message(),
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
