//! Key layout.

use std::fmt::Display;

/// Builds every key name under one prefix.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches(':').to_string(),
        }
    }

    /// Hash holding one document, field → JSON-encoded value.
    pub fn doc(&self, id: impl Display) -> String {
        format!("{}:doc:{}", self.prefix, id)
    }

    /// Sorted set of all ids, scored by insertion sequence.
    pub fn all(&self) -> String {
        format!("{}:all", self.prefix)
    }

    /// Prefix of the per-owner sorted sets; the suffix is the JSON-encoded owner.
    pub fn owner_prefix(&self) -> String {
        format!("{}:owner:", self.prefix)
    }

    pub fn owner(&self, index_key: &str) -> String {
        format!("{}{}", self.owner_prefix(), index_key)
    }

    /// Insertion sequence counter.
    pub fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    /// Change stream.
    pub fn changes(&self) -> String {
        format!("{}:changes", self.prefix)
    }

    /// Counter behind the change stream's entry ids.
    pub fn change_seq(&self) -> String {
        format!("{}:changes:seq", self.prefix)
    }

    /// Resume cursor of a named listener.
    pub fn cursor(&self, listener: &str) -> String {
        format!("{}:cursor:{}", self.prefix, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklive_core::TaskId;

    #[test]
    fn test_key_layout() {
        let keys = Keys::new("todo:tasks:");
        assert_eq!(keys.all(), "todo:tasks:all");
        assert_eq!(keys.seq(), "todo:tasks:seq");
        assert_eq!(keys.changes(), "todo:tasks:changes");
        assert_eq!(keys.change_seq(), "todo:tasks:changes:seq");
        assert_eq!(keys.cursor("default"), "todo:tasks:cursor:default");
        assert_eq!(keys.owner("\"a@x.com\""), "todo:tasks:owner:\"a@x.com\"");
        assert_eq!(keys.owner("null"), "todo:tasks:owner:null");
    }

    #[test]
    fn test_doc_key_uses_canonical_id() {
        let keys = Keys::new("t");
        let id = TaskId::parse("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        assert_eq!(keys.doc(&id), "t:doc:6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }
}
