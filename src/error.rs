//! ==============================================================================
//! error.rs - failure types for every component
//! ==============================================================================
//!
//! nothing in here is fatal to the process. each variant degrades one feature:
//!     - StoreError    -> a query answers 500 / an empty history
//!     - IngestError   -> one telemetry message is dropped
//!     - RequestError  -> one viewer frame is ignored
//!     - ApiError      -> one http request fails with a json error body
//!
//! ==============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// a writer panicked while holding the store lock
    #[error("reading store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload is not valid telemetry json: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("alert level {0} outside 0..=3")]
    AlertLevelOutOfRange(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("viewer frame is not a valid request: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("startTime and endTime are required")]
    MissingRange,

    #[error("startTime and endTime must be ISO-8601 timestamps")]
    InvalidRange,

    #[error("Failed to fetch sensor readings")]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingRange | ApiError::InvalidRange => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Store(e) = &self {
            tracing::error!(error = %e, "error fetching sensor readings");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
