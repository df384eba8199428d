use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error taxonomy surfaced at the HTTP boundary (component C11).
///
/// Internal components (scan executors, sensor adapters) never propagate
/// these upward — they degrade to `None`/empty results per their own
/// recovery contracts (§7). Only the persistence layer, auth, and request
/// validation raise variants that reach a handler.
#[derive(Debug, thiserror::Error)]
pub enum PiwError {
    #[error("config error: {0}")]
    Config(String),
    #[error("persistence conflict: {0}")]
    Conflict(String),
    #[error("persistence timeout")]
    Timeout,
    #[error("database corruption detected: {0}")]
    Corruption(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl PiwError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PiwError::Config(_) => (StatusCode::BAD_REQUEST, "400"),
            PiwError::Conflict(_) => (StatusCode::CONFLICT, "409"),
            PiwError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "504"),
            PiwError::Corruption(_) => (StatusCode::INTERNAL_SERVER_ERROR, "500"),
            PiwError::Network(_) => (StatusCode::BAD_GATEWAY, "502"),
            PiwError::Unauthorized => (StatusCode::UNAUTHORIZED, "401"),
            PiwError::Validation(_) => (StatusCode::BAD_REQUEST, "400"),
            PiwError::NotFound(_) => (StatusCode::NOT_FOUND, "404"),
            PiwError::Sqlite(_) => (StatusCode::INTERNAL_SERVER_ERROR, "500"),
        }
    }
}

impl IntoResponse for PiwError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if matches!(self, PiwError::Unauthorized) {
            "Unauthorized".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({"code": code, "message": message}))).into_response()
    }
}
