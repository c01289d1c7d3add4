use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

use crate::ingest::IngestError;
use crate::persistence::PersistError;

/// Failure of one API request, mapped onto a plain-text response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed batch: {0}")]
    BadRequest(#[from] IngestError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("state changed but could not be persisted: {0}")]
    Persist(#[from] PersistError),
}

impl ApiError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Persist(err) => error!(error = %err, "request failed to persist state"),
            other => debug!(status = status.as_u16(), error = %other, "request rejected"),
        }
        (status, self.to_string()).into_response()
    }
}
