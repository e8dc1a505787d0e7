//! Task domain models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};

/// A schemaless task document. Only `_id` is guaranteed to be present.
pub type Document = Map<String, Value>;

/// Field holding the document identifier.
pub const ID_FIELD: &str = "_id";

/// Field holding the owner email; the only key reads are partitioned on.
pub const OWNER_FIELD: &str = "email";

/// Field stamped with the creation time on insert.
pub const TIMESTAMP_FIELD: &str = "timeStamp";

/// Opaque task identifier, assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse untrusted input into an identifier.
    pub fn parse(raw: &str) -> TaskResult<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| TaskError::InvalidIdentifier(raw.to_string()))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TaskId {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Owner-scoped read filter.
///
/// Matching is exact equality on the `email` value. `Unowned` matches documents
/// whose `email` is absent or null, which is what a read without an email
/// parameter selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerFilter {
    Email(String),
    Unowned,
}

impl OwnerFilter {
    pub fn from_query(email: Option<String>) -> Self {
        match email {
            Some(email) => Self::Email(email),
            None => Self::Unowned,
        }
    }

    /// The owner value this filter selects.
    pub fn value(&self) -> Value {
        match self {
            Self::Email(email) => Value::String(email.clone()),
            Self::Unowned => Value::Null,
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        owner_value(document) == self.value()
    }

    /// Stable text key for indexing documents by owner.
    pub fn index_key(&self) -> String {
        self.value().to_string()
    }
}

/// Owner value of a document; absent is treated as null.
pub fn owner_value(document: &Document) -> Value {
    document.get(OWNER_FIELD).cloned().unwrap_or(Value::Null)
}

/// Index key of a document's owner, consistent with [`OwnerFilter::index_key`].
pub fn owner_index_key(document: &Document) -> String {
    owner_value(document).to_string()
}

/// Result of inserting a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: TaskId,
}

impl InsertOneResult {
    pub fn new(inserted_id: TaskId) -> Self {
        Self {
            acknowledged: true,
            inserted_id,
        }
    }
}

/// Result of a single-document partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    pub upserted_id: Option<TaskId>,
}

impl UpdateResult {
    pub fn new(matched_count: u64, modified_count: u64) -> Self {
        Self {
            acknowledged: true,
            matched_count,
            modified_count,
            upserted_count: 0,
            upserted_id: None,
        }
    }
}

/// Result of a single-document delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl DeleteResult {
    pub fn new(deleted_count: u64) -> Self {
        Self {
            acknowledged: true,
            deleted_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_id() {
        let id = TaskId::new();
        let parsed = TaskId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = TaskId::parse("not-an-id").unwrap_err();
        assert!(matches!(err, TaskError::InvalidIdentifier(ref raw) if raw == "not-an-id"));
        assert!(TaskId::parse("").is_err());
        assert!(TaskId::parse("65f1c2a9e4b0a1b2c3d4e5f6").is_err());
    }

    #[test]
    fn test_owner_filter_matches_exact_email() {
        let doc = json!({"_id": "x", "email": "a@x.com"});
        let doc = doc.as_object().unwrap();
        assert!(OwnerFilter::Email("a@x.com".into()).matches(doc));
        assert!(!OwnerFilter::Email("A@x.com".into()).matches(doc));
        assert!(!OwnerFilter::Unowned.matches(doc));
    }

    #[test]
    fn test_unowned_matches_missing_and_null_email() {
        let missing = json!({"_id": "x"});
        let null = json!({"_id": "y", "email": null});
        assert!(OwnerFilter::Unowned.matches(missing.as_object().unwrap()));
        assert!(OwnerFilter::Unowned.matches(null.as_object().unwrap()));
        assert_eq!(owner_index_key(missing.as_object().unwrap()), "null");
    }

    #[test]
    fn test_non_string_email_never_matches_query() {
        let doc = json!({"_id": "x", "email": 5});
        let doc = doc.as_object().unwrap();
        assert!(!OwnerFilter::Email("5".into()).matches(doc));
        assert_ne!(owner_index_key(doc), OwnerFilter::Email("5".into()).index_key());
    }

    #[test]
    fn test_results_serialize_camel_case() {
        let id = TaskId::new();
        let insert = serde_json::to_value(InsertOneResult::new(id)).unwrap();
        assert_eq!(insert, json!({"acknowledged": true, "insertedId": id.to_string()}));

        let update = serde_json::to_value(UpdateResult::new(1, 0)).unwrap();
        assert_eq!(update["matchedCount"], 1);
        assert_eq!(update["modifiedCount"], 0);
        assert_eq!(update["upsertedId"], Value::Null);

        let delete = serde_json::to_value(DeleteResult::new(0)).unwrap();
        assert_eq!(delete, json!({"acknowledged": true, "deletedCount": 0}));
    }
}
