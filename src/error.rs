//! Files API Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for Files API operations
pub type Result<T> = std::result::Result<T, Error>;

/// Files API error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Request errors
    #[error("{message}")]
    Validation { message: String, input: serde_json::Value },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    Conflict(String),

    // Upstream errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Secrets error: {0}")]
    Secrets(String),

    #[error("Secrets extension returned HTTP {status} for {name}")]
    SecretsStatus { name: String, status: u16 },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a validation error that echoes the offending input
    pub fn validation(message: impl Into<String>, input: impl Serialize) -> Self {
        Error::Validation {
            message: message.into(),
            input: serde_json::to_value(input).unwrap_or(serde_json::Value::Null),
        }
    }

    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SecretsStatus { status: 400, .. })
    }
}

/// One entry of a 422 response body
#[derive(Debug, Serialize)]
pub struct ValidationDetail {
    pub msg: String,
    pub input: serde_json::Value,
}

/// 422 response body
#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    pub detail: Vec<ValidationDetail>,
}

/// 404 response body
#[derive(Debug, Serialize)]
pub struct NotFoundResponse {
    pub detail: String,
}

/// 500 response body
#[derive(Debug, Serialize)]
pub struct InternalErrorResponse {
    pub message: String,
    pub detail: String,
}

impl InternalErrorResponse {
    pub fn generic() -> Self {
        Self {
            message: "An unexpected error occurred.".to_string(),
            detail: "Internal Server Error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            Error::Validation { message, input } => {
                tracing::warn!("Validation failed: {}", message);
                (
                    status,
                    Json(ValidationErrorResponse {
                        detail: vec![ValidationDetail { msg: message, input }],
                    }),
                )
                    .into_response()
            }
            Error::NotFound(_) => {
                let detail = self.to_string();
                tracing::error!("{}", detail);
                (status, Json(NotFoundResponse { detail })).into_response()
            }
            Error::Conflict(ref path) => {
                tracing::error!("{}", self);
                (
                    status,
                    Json(serde_json::json!({
                        "file_path": path,
                        "message": "File already exists. Please use a different file name.",
                    })),
                )
                    .into_response()
            }
            other => {
                // Never leak upstream detail to the caller
                tracing::error!(error = %other, "Unhandled error while serving request");
                (status, Json(InternalErrorResponse::generic())).into_response()
            }
        }
    }
}
