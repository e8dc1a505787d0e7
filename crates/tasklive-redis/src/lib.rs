//! Tasklive Redis Data Layer
//!
//! Stores task documents in Redis hashes and records every mutation on a Redis
//! stream, which doubles as the collection's change feed.

pub mod client;
pub mod keys;
pub mod scripts;
pub mod store;
pub mod stream;

pub use client::{init_pool, RedisError, RedisPool, RedisResult};
pub use keys::Keys;
pub use store::RedisTaskStore;
pub use stream::RedisChangeSource;

use std::time::Duration;

/// Tunables shared by the store and the change source.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Namespace for every key the backend touches.
    pub key_prefix: String,
    /// Approximate cap on change stream length.
    pub stream_maxlen: usize,
    /// How long one blocking stream read waits.
    pub block: Duration,
    /// Max entries fetched per stream read.
    pub batch_size: usize,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            key_prefix: "todo:tasks".to_string(),
            stream_maxlen: 10_000,
            block: Duration::from_secs(5),
            batch_size: 128,
        }
    }
}

/// Store and change source sharing one Redis deployment.
pub struct RedisBackend {
    pub store: RedisTaskStore,
    pub source: RedisChangeSource,
}

impl RedisBackend {
    /// Connect to Redis and build both halves of the backend.
    ///
    /// Example URL: `redis://127.0.0.1:6379`
    pub async fn connect(redis_url: &str, settings: RedisSettings) -> RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let pool = init_pool(&client).await?;
        let keys = Keys::new(&settings.key_prefix);
        tracing::info!(prefix = %settings.key_prefix, "Connected to Redis");
        Ok(Self {
            store: RedisTaskStore::new(pool.clone(), keys.clone(), settings.stream_maxlen),
            source: RedisChangeSource::new(client, pool, keys, &settings),
        })
    }
}
