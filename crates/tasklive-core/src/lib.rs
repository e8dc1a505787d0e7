//! Tasklive Core Library
//!
//! Task documents, the store and change-source seams, and the bridge that turns
//! committed mutations into real-time notifications.

pub mod broadcast;
pub mod change;
pub mod error;
pub mod memory;
pub mod task;

pub use broadcast::{Broadcaster, EmissionPolicy, Frame};
pub use change::listener::{Backoff, ChangeFeedListener};
pub use change::{
    ChangeNotification, ChangeRecord, ChangeSource, ChangeSubscription, OperationKind,
    ResumeToken,
};
pub use error::{TaskError, TaskResult};
pub use memory::MemoryStore;
pub use task::model::{
    DeleteResult, Document, InsertOneResult, OwnerFilter, TaskId, UpdateResult,
};
pub use task::{Committed, TaskStore};
