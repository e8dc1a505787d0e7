//! Centralized error types for tasklive.

use thiserror::Error;

/// Main error type for task operations.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid task identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Change feed error: {0}")]
    Feed(String),
}

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

impl TaskError {
    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a change feed error.
    pub fn feed(msg: impl Into<String>) -> Self {
        Self::Feed(msg.into())
    }
}
