//! Redis connection pool management.

use redis::aio::ConnectionManager;
use tasklive_core::TaskError;
use thiserror::Error;

/// Redis error types.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Result type for Redis operations.
pub type RedisResult<T> = Result<T, RedisError>;

/// Redis connection pool. ConnectionManager multiplexes internally and
/// reconnects on its own; callers clone it to get a handle per operation.
pub type RedisPool = ConnectionManager;

/// Initialize a Redis connection pool from an opened client.
pub async fn init_pool(client: &redis::Client) -> RedisResult<RedisPool> {
    let manager = ConnectionManager::new(client.clone()).await?;
    Ok(manager)
}

impl From<RedisError> for TaskError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::Serialization(e) => TaskError::Json(e),
            other => TaskError::store(other.to_string()),
        }
    }
}
