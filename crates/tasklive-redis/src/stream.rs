//! Change feed over the Redis stream the mutation scripts append to.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tasklive_core::{
    ChangeRecord, ChangeSource, ChangeSubscription, Document, OperationKind, ResumeToken,
    TaskResult,
};
use tracing::{debug, warn};

use crate::client::{RedisError, RedisPool, RedisResult};
use crate::keys::Keys;
use crate::RedisSettings;

/// Id that sorts before every real stream entry.
const STREAM_START: &str = "0-0";

pub struct RedisChangeSource {
    client: redis::Client,
    pool: RedisPool,
    keys: Keys,
    block: Duration,
    batch_size: usize,
}

impl RedisChangeSource {
    pub fn new(client: redis::Client, pool: RedisPool, keys: Keys, settings: &RedisSettings) -> Self {
        Self {
            client,
            pool,
            keys,
            block: settings.block,
            batch_size: settings.batch_size.max(1),
        }
    }

    async fn newest_entry(&self) -> RedisResult<ResumeToken> {
        let mut conn = self.pool.clone();
        let reply: StreamRangeReply = conn.xrevrange_count(self.keys.changes(), "+", "-", 1).await?;
        let token = reply
            .ids
            .first()
            .map(|entry| entry.id.clone())
            .unwrap_or_else(|| STREAM_START.to_string());
        Ok(ResumeToken::new(token))
    }

    async fn gap_after(&self, after: &ResumeToken) -> RedisResult<u64> {
        let after = entry_seq(after.as_str())?;
        let mut conn = self.pool.clone();
        let reply: StreamRangeReply = conn.xrange_count(self.keys.changes(), "-", "+", 1).await?;
        let oldest = match reply.ids.first() {
            Some(entry) => entry_seq(&entry.id)?,
            None => {
                let last: Option<u64> = conn.get(self.keys.change_seq()).await?;
                last.unwrap_or(0) + 1
            }
        };
        Ok(oldest.saturating_sub(after.saturating_add(1)))
    }
}

/// Sequence number carried in the millisecond part of a `<n>-0` entry id.
pub fn entry_seq(id: &str) -> RedisResult<u64> {
    id.split_once('-')
        .map_or(id, |(n, _)| n)
        .parse()
        .map_err(|_| RedisError::UnexpectedReply(format!("malformed stream id: {}", id)))
}

/// Parse one stream entry written by the mutation scripts.
///
/// Payloads that fail to parse are dropped from the record rather than failing
/// the read, so a corrupt entry is skipped instead of stalling the feed.
pub fn record_from_entry(entry: &StreamId) -> ChangeRecord {
    let op: String = entry.get("op").unwrap_or_default();
    let id: String = entry.get("id").unwrap_or_default();
    ChangeRecord {
        token: ResumeToken::new(entry.id.clone()),
        op: OperationKind::parse(&op),
        document: parse_payload(entry, "doc"),
        updated_fields: parse_payload(entry, "fields"),
        id,
    }
}

fn parse_payload(entry: &StreamId, field: &str) -> Option<Document> {
    let raw: String = entry.get(field)?;
    match serde_json::from_str(&raw) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!(token = %entry.id, field, error = %e, "Dropping unparsable change payload");
            None
        }
    }
}

/// Dedicated connection for blocking reads; XREAD BLOCK would stall every
/// other command sharing a multiplexed connection.
struct RedisSubscription {
    conn: MultiplexedConnection,
    key: String,
    options: StreamReadOptions,
}

impl RedisSubscription {
    async fn read(&mut self, after: &ResumeToken) -> RedisResult<Vec<ChangeRecord>> {
        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[self.key.as_str()], &[after.as_str()], &self.options)
            .await?;
        let records: Vec<ChangeRecord> = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|stream| stream.ids)
            .map(|entry| record_from_entry(&entry))
            .collect();
        if !records.is_empty() {
            debug!(count = records.len(), after = %after, "Read change stream batch");
        }
        Ok(records)
    }
}

#[async_trait]
impl ChangeSubscription for RedisSubscription {
    async fn next_batch(&mut self, after: &ResumeToken) -> TaskResult<Vec<ChangeRecord>> {
        Ok(self.read(after).await?)
    }
}

#[async_trait]
impl ChangeSource for RedisChangeSource {
    async fn subscribe(&self) -> TaskResult<Box<dyn ChangeSubscription>> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(RedisError::from)?;
        let options = StreamReadOptions::default()
            .block(self.block.as_millis() as usize)
            .count(self.batch_size);
        Ok(Box::new(RedisSubscription {
            conn,
            key: self.keys.changes(),
            options,
        }))
    }

    async fn head(&self) -> TaskResult<ResumeToken> {
        Ok(self.newest_entry().await?)
    }

    async fn load_cursor(&self, listener: &str) -> TaskResult<Option<ResumeToken>> {
        let mut conn = self.pool.clone();
        let cursor: Option<String> = conn
            .get(self.keys.cursor(listener))
            .await
            .map_err(RedisError::from)?;
        Ok(cursor.map(ResumeToken::new))
    }

    async fn save_cursor(&self, listener: &str, token: &ResumeToken) -> TaskResult<()> {
        let mut conn = self.pool.clone();
        conn.set::<_, _, ()>(self.keys.cursor(listener), token.as_str())
            .await
            .map_err(RedisError::from)?;
        Ok(())
    }

    async fn trimmed_since(&self, after: &ResumeToken) -> TaskResult<u64> {
        Ok(self.gap_after(after).await?)
    }
}
