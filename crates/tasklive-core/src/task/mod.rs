//! Task persistence seam and document helpers shared by store backends.

pub mod model;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::change::ChangeRecord;
use crate::error::TaskResult;
use model::{DeleteResult, Document, InsertOneResult, OwnerFilter, TaskId, UpdateResult};
use model::{ID_FIELD, TIMESTAMP_FIELD};

/// Outcome of a write together with the change-stream entry it committed, if any.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub result: T,
    pub change: Option<ChangeRecord>,
}

impl<T> Committed<T> {
    pub fn new(result: T, change: Option<ChangeRecord>) -> Self {
        Self { result, change }
    }
}

/// A single collection of task documents.
///
/// Every mutation is atomic per document and appends exactly one entry to the
/// collection's change stream when it alters stored state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Check that the backing store answers.
    async fn ping(&self) -> TaskResult<()>;

    /// Insert a new task. The store assigns `_id` and stamps `timeStamp`.
    async fn insert(&self, body: Document) -> TaskResult<Committed<InsertOneResult>>;

    /// All tasks matching the owner filter, in insertion order.
    async fn find_by_owner(&self, owner: &OwnerFilter) -> TaskResult<Vec<Document>>;

    /// Merge `changes` into the task's top-level fields.
    async fn update_fields(
        &self,
        id: &TaskId,
        changes: Document,
    ) -> TaskResult<Committed<UpdateResult>>;

    /// Hard-delete a task.
    async fn delete(&self, id: &TaskId) -> TaskResult<Committed<DeleteResult>>;
}

/// Build the stored form of a new task from a request body.
///
/// Client-supplied `_id` and `timeStamp` are overwritten.
pub fn prepare_insert(mut body: Document, id: &TaskId, now: DateTime<Utc>) -> Document {
    body.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    body.insert(TIMESTAMP_FIELD.to_string(), Value::String(now.to_rfc3339()));
    body
}

/// Drop fields an update may never touch.
pub fn sanitize_changes(mut changes: Document) -> Document {
    changes.remove(ID_FIELD);
    changes
}

/// Merge `changes` into `document`, returning only the fields whose value changed.
pub fn apply_changes(document: &mut Document, changes: Document) -> Document {
    let mut changed = Document::new();
    for (field, value) in sanitize_changes(changes) {
        if document.get(&field) != Some(&value) {
            document.insert(field.clone(), value.clone());
            changed.insert(field, value);
        }
    }
    changed
}
