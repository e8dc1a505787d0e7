//! Change stream records and their normalized notifications.

pub mod listener;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;

use crate::error::TaskResult;
use crate::task::model::{Document, ID_FIELD};

pub const EVENT_TASK_ADDED: &str = "taskAdded";
pub const EVENT_TASK_UPDATED: &str = "taskUpdated";
pub const EVENT_TASK_DELETED: &str = "taskDeleted";

/// Position of an entry in a change stream.
///
/// Tokens are opaque to everything except the source that issued them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResumeToken(String);

impl ResumeToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of mutation recorded on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Other(String),
}

impl OperationKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other(s) => s,
        }
    }
}

/// A raw mutation event as the store reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub token: ResumeToken,
    pub op: OperationKind,
    pub id: String,
    /// Full document, present on inserts.
    pub document: Option<Document>,
    /// Fields whose value changed, present on updates.
    pub updated_fields: Option<Document>,
}

impl ChangeRecord {
    pub fn insert(token: ResumeToken, id: impl Into<String>, document: Document) -> Self {
        Self {
            token,
            op: OperationKind::Insert,
            id: id.into(),
            document: Some(document),
            updated_fields: None,
        }
    }

    pub fn update(token: ResumeToken, id: impl Into<String>, updated_fields: Document) -> Self {
        Self {
            token,
            op: OperationKind::Update,
            id: id.into(),
            document: None,
            updated_fields: Some(updated_fields),
        }
    }

    pub fn delete(token: ResumeToken, id: impl Into<String>) -> Self {
        Self {
            token,
            op: OperationKind::Delete,
            id: id.into(),
            document: None,
            updated_fields: None,
        }
    }
}

/// Normalized notification pushed to real-time clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotification {
    Added { id: String, document: Document },
    Updated { id: String, updated_fields: Document },
    Deleted { id: String },
}

impl ChangeNotification {
    /// Classify a raw record. Operation kinds other than insert, update and
    /// delete yield `None`, as does an insert that lost its document.
    pub fn from_record(record: &ChangeRecord) -> Option<Self> {
        match record.op {
            OperationKind::Insert => record.document.as_ref().map(|document| Self::Added {
                id: record.id.clone(),
                document: document.clone(),
            }),
            OperationKind::Update => Some(Self::Updated {
                id: record.id.clone(),
                updated_fields: record.updated_fields.clone().unwrap_or_default(),
            }),
            OperationKind::Delete => Some(Self::Deleted {
                id: record.id.clone(),
            }),
            OperationKind::Other(_) => None,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Added { .. } => EVENT_TASK_ADDED,
            Self::Updated { .. } => EVENT_TASK_UPDATED,
            Self::Deleted { .. } => EVENT_TASK_DELETED,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Added { id, .. } | Self::Updated { id, .. } | Self::Deleted { id } => id,
        }
    }

    /// Client-facing payload.
    ///
    /// `taskAdded` flattens the document next to `id` (its `_id` is dropped),
    /// `taskUpdated` nests the delta under `updatedTask`, `taskDeleted` is just `id`.
    pub fn payload(&self) -> Value {
        match self {
            Self::Added { id, document } => {
                let mut payload = document.clone();
                payload.remove(ID_FIELD);
                payload.insert("id".to_string(), Value::String(id.clone()));
                Value::Object(payload)
            }
            Self::Updated { id, updated_fields } => json!({
                "id": id,
                "updatedTask": updated_fields,
            }),
            Self::Deleted { id } => json!({ "id": id }),
        }
    }
}

/// A collection's change stream.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Open a live subscription.
    async fn subscribe(&self) -> TaskResult<Box<dyn ChangeSubscription>>;

    /// Token of the newest committed entry; reading after it yields only future changes.
    async fn head(&self) -> TaskResult<ResumeToken>;

    /// Last token persisted by the named listener.
    async fn load_cursor(&self, listener: &str) -> TaskResult<Option<ResumeToken>>;

    async fn save_cursor(&self, listener: &str, token: &ResumeToken) -> TaskResult<()>;

    /// How many entries committed after `after` were trimmed from the bounded
    /// history before they could be read. Zero when nothing was lost.
    async fn trimmed_since(&self, after: &ResumeToken) -> TaskResult<u64>;
}

/// A live read handle on a change stream.
#[async_trait]
pub trait ChangeSubscription: Send {
    /// Wait for entries strictly after `after`, returning them in commit order.
    ///
    /// Returns an empty batch when the source's poll window elapses without news.
    async fn next_batch(&mut self, after: &ResumeToken) -> TaskResult<Vec<ChangeRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_insert_becomes_added_with_flat_payload() {
        let record = ChangeRecord::insert(
            ResumeToken::new("1-0"),
            "abc",
            doc(json!({"_id": "abc", "name": "buy milk", "email": "a@x.com", "timeStamp": "t"})),
        );
        let notification = ChangeNotification::from_record(&record).unwrap();
        assert_eq!(notification.event_name(), "taskAdded");
        assert_eq!(
            notification.payload(),
            json!({"id": "abc", "name": "buy milk", "email": "a@x.com", "timeStamp": "t"})
        );
    }

    #[test]
    fn test_update_carries_only_delta() {
        let record = ChangeRecord::update(ResumeToken::new("2-0"), "abc", doc(json!({"category": "done"})));
        let notification = ChangeNotification::from_record(&record).unwrap();
        assert_eq!(notification.event_name(), "taskUpdated");
        assert_eq!(
            notification.payload(),
            json!({"id": "abc", "updatedTask": {"category": "done"}})
        );
    }

    #[test]
    fn test_delete_carries_only_id() {
        let record = ChangeRecord::delete(ResumeToken::new("3-0"), "abc");
        let notification = ChangeNotification::from_record(&record).unwrap();
        assert_eq!(notification.event_name(), "taskDeleted");
        assert_eq!(notification.payload(), json!({"id": "abc"}));
    }

    #[test]
    fn test_other_operations_are_ignored() {
        let record = ChangeRecord {
            token: ResumeToken::new("4-0"),
            op: OperationKind::parse("drop"),
            id: String::new(),
            document: None,
            updated_fields: None,
        };
        assert_eq!(record.op, OperationKind::Other("drop".into()));
        assert!(ChangeNotification::from_record(&record).is_none());
    }

    #[test]
    fn test_insert_without_document_is_ignored() {
        let mut record = ChangeRecord::insert(ResumeToken::new("5-0"), "abc", Document::new());
        record.document = None;
        assert!(ChangeNotification::from_record(&record).is_none());
    }

    #[test]
    fn test_operation_kind_round_trip() {
        for op in ["insert", "update", "delete", "replace"] {
            assert_eq!(OperationKind::parse(op).as_str(), op);
        }
    }
}
