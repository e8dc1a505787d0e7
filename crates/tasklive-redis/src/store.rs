//! Task document queries against Redis.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tasklive_core::task::model::owner_index_key;
use tasklive_core::task::{prepare_insert, sanitize_changes};
use tasklive_core::{
    ChangeRecord, Committed, DeleteResult, Document, InsertOneResult, OwnerFilter, ResumeToken,
    TaskId, TaskResult, TaskStore, UpdateResult,
};
use tracing::debug;

use crate::client::{RedisError, RedisPool, RedisResult};
use crate::keys::Keys;
use crate::scripts::Scripts;

/// Encode top-level fields as (name, JSON text) pairs.
pub fn encode_fields(document: &Document) -> RedisResult<Vec<(String, String)>> {
    document
        .iter()
        .map(|(field, value)| -> RedisResult<(String, String)> {
            Ok((field.clone(), serde_json::to_string(value)?))
        })
        .collect()
}

/// Rebuild a document from its hash.
pub fn decode_document(raw: HashMap<String, String>) -> RedisResult<Document> {
    raw.into_iter()
        .map(|(field, json)| -> RedisResult<(String, serde_json::Value)> {
            Ok((field, serde_json::from_str(&json)?))
        })
        .collect()
}

#[derive(Clone)]
pub struct RedisTaskStore {
    pool: RedisPool,
    keys: Keys,
    stream_maxlen: usize,
    scripts: Arc<Scripts>,
}

impl RedisTaskStore {
    pub fn new(pool: RedisPool, keys: Keys, stream_maxlen: usize) -> Self {
        Self {
            pool,
            keys,
            stream_maxlen,
            scripts: Arc::new(Scripts::new()),
        }
    }

    async fn insert_task(&self, body: Document) -> RedisResult<Committed<InsertOneResult>> {
        let id = TaskId::new();
        let document = prepare_insert(body, &id, Utc::now());
        let json = serde_json::to_string(&document)?;

        let mut invocation = self.scripts.insert.prepare_invoke();
        invocation
            .key(self.keys.doc(id))
            .key(self.keys.all())
            .key(self.keys.owner(&owner_index_key(&document)))
            .key(self.keys.seq())
            .key(self.keys.changes())
            .key(self.keys.change_seq())
            .arg(id.to_string())
            .arg(self.stream_maxlen)
            .arg(&json);
        for (field, value) in encode_fields(&document)? {
            invocation.arg(field).arg(value);
        }

        let mut conn = self.pool.clone();
        let token: String = invocation.invoke_async(&mut conn).await?;
        debug!(task_id = %id, token = %token, "Task inserted");

        let record = ChangeRecord::insert(ResumeToken::new(token), id.to_string(), document);
        Ok(Committed::new(InsertOneResult::new(id), Some(record)))
    }

    async fn list_by_owner(&self, owner: &OwnerFilter) -> RedisResult<Vec<Document>> {
        let mut conn = self.pool.clone();
        let ids: Vec<String> = conn.zrange(self.keys.owner(&owner.index_key()), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.keys.doc(id));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        // A row can vanish between the index read and the fetch.
        rows.into_iter()
            .filter(|row| !row.is_empty())
            .map(decode_document)
            .collect()
    }

    async fn update_task(
        &self,
        id: &TaskId,
        changes: Document,
    ) -> RedisResult<Committed<UpdateResult>> {
        let changes = sanitize_changes(changes);

        let mut invocation = self.scripts.update.prepare_invoke();
        invocation
            .key(self.keys.doc(id))
            .key(self.keys.all())
            .key(self.keys.changes())
            .key(self.keys.change_seq())
            .arg(id.to_string())
            .arg(self.stream_maxlen)
            .arg(self.keys.owner_prefix());
        for (field, value) in encode_fields(&changes)? {
            invocation.arg(field).arg(value);
        }

        let mut conn = self.pool.clone();
        let (matched, modified, token, fields): (u64, u64, Option<String>, Option<String>) =
            invocation.invoke_async(&mut conn).await?;

        let change = match (token, fields) {
            (Some(token), Some(fields)) => {
                let updated: Document = serde_json::from_str(&fields)?;
                debug!(task_id = %id, token = %token, "Task updated");
                Some(ChangeRecord::update(ResumeToken::new(token), id.to_string(), updated))
            }
            (None, None) => None,
            _ => {
                return Err(RedisError::UnexpectedReply(
                    "update script returned a token without fields".to_string(),
                ))
            }
        };
        Ok(Committed::new(UpdateResult::new(matched, modified), change))
    }

    async fn delete_task(&self, id: &TaskId) -> RedisResult<Committed<DeleteResult>> {
        let mut invocation = self.scripts.delete.prepare_invoke();
        invocation
            .key(self.keys.doc(id))
            .key(self.keys.all())
            .key(self.keys.changes())
            .key(self.keys.change_seq())
            .arg(id.to_string())
            .arg(self.stream_maxlen)
            .arg(self.keys.owner_prefix());

        let mut conn = self.pool.clone();
        let (deleted, token): (u64, Option<String>) = invocation.invoke_async(&mut conn).await?;
        let change = token.map(|token| {
            debug!(task_id = %id, token = %token, "Task deleted");
            ChangeRecord::delete(ResumeToken::new(token), id.to_string())
        });
        Ok(Committed::new(DeleteResult::new(deleted), change))
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn ping(&self) -> TaskResult<()> {
        let mut conn = self.pool.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(())
    }

    async fn insert(&self, body: Document) -> TaskResult<Committed<InsertOneResult>> {
        Ok(self.insert_task(body).await?)
    }

    async fn find_by_owner(&self, owner: &OwnerFilter) -> TaskResult<Vec<Document>> {
        Ok(self.list_by_owner(owner).await?)
    }

    async fn update_fields(
        &self,
        id: &TaskId,
        changes: Document,
    ) -> TaskResult<Committed<UpdateResult>> {
        Ok(self.update_task(id, changes).await?)
    }

    async fn delete(&self, id: &TaskId) -> TaskResult<Committed<DeleteResult>> {
        Ok(self.delete_task(id).await?)
    }
}
