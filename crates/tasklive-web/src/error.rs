//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tasklive_core::TaskError;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid task id: {0}")]
    InvalidIdentifier(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Origin not allowed: {0}")]
    ForbiddenOrigin(String),

    #[error(transparent)]
    Internal(TaskError),
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::InvalidIdentifier(raw) => Self::InvalidIdentifier(raw),
            TaskError::NotFound(id) => Self::NotFound(id),
            other => Self::Internal(other),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ForbiddenOrigin(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Store failures are logged, never echoed to the caller.
        let message = match &self {
            Self::Internal(e) => {
                error!(error = %e, "Request failed");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
