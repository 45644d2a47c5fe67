//! Error taxonomy for channel ingestion and sync.
//!
//! `SyncError` is returned by every service-layer function and converts
//! directly into an HTTP response, so route handlers can use `?` instead of
//! mapping each failure to a `StatusCode` by hand.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("webhook signature is invalid")]
    SignatureInvalid,

    #[error("webhook signature header is missing")]
    SignatureMissing,

    #[error("platform unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("a sync run is already in progress for channel {0}")]
    SyncInProgress(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::InvalidCredentials(_)
            | SyncError::MalformedPayload(_)
            | SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SyncError::SignatureInvalid | SyncError::SignatureMissing => StatusCode::UNAUTHORIZED,
            SyncError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            SyncError::SyncInProgress(_) => StatusCode::CONFLICT,
            SyncError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::UpstreamUnavailable(e.to_string())
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Signature failures get a fixed body so callers learn nothing about why.
        let message = match &self {
            SyncError::SignatureInvalid | SyncError::SignatureMissing => "unauthorized".to_string(),
            SyncError::Database(e) => {
                error!("Database error while handling request: {}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
