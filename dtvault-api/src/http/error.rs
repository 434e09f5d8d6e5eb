// HTTP error handling
//
// Errors are answered in plain text, one line terminated by a newline.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    }

    pub fn missing_id() -> Self {
        Self::bad_request("Missing id")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, format!("{}\n", self.message)).into_response()
    }
}

/// Convert dtvault_core errors to HTTP errors. Details of server-side
/// failures are logged, never sent.
impl From<dtvault_core::Error> for AppError {
    fn from(err: dtvault_core::Error) -> Self {
        use dtvault_core::Error;

        match err {
            Error::PresetNotFound(id) => Self::bad_request(format!("Preset '{id}' not found")),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            other => {
                tracing::error!(error = %other, "Request failed");
                Self::internal()
            }
        }
    }
}

/// Fallback for unknown paths and unsupported methods
pub async fn not_found() -> AppError {
    AppError::not_found("Not found")
}
