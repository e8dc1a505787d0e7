//! In-process task store with its own change stream.
//!
//! Used for local development without Redis and by the test suites. Every
//! mutation takes the same lock that appends to the change log, so log order is
//! commit order.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use crate::change::{ChangeRecord, ChangeSource, ChangeSubscription, ResumeToken};
use crate::error::{TaskError, TaskResult};
use crate::task::model::{
    DeleteResult, Document, InsertOneResult, OwnerFilter, TaskId, UpdateResult,
};
use crate::task::{apply_changes, prepare_insert, Committed, TaskStore};

const DEFAULT_LOG_LIMIT: usize = 10_000;
const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(5);

#[derive(Default)]
struct State {
    documents: HashMap<TaskId, (u64, Document)>,
    order: BTreeMap<u64, TaskId>,
    next_seq: u64,
    log: VecDeque<(u64, ChangeRecord)>,
    next_token: u64,
    cursors: HashMap<String, ResumeToken>,
}

impl State {
    fn append(&mut self, limit: usize, build: impl FnOnce(ResumeToken) -> ChangeRecord) -> ChangeRecord {
        self.next_token += 1;
        let record = build(ResumeToken::new(self.next_token.to_string()));
        self.log.push_back((self.next_token, record.clone()));
        while self.log.len() > limit {
            self.log.pop_front();
        }
        record
    }

    /// Token of the oldest entry still held; one past the newest when empty.
    fn oldest_retained(&self) -> u64 {
        self.log
            .front()
            .map(|(n, _)| *n)
            .unwrap_or(self.next_token + 1)
    }

    fn changes_after(&self, after: u64) -> Vec<ChangeRecord> {
        self.log
            .iter()
            .filter(|(n, _)| *n > after)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Notify,
    log_limit: usize,
    poll_window: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Memory-backed [`TaskStore`] and [`ChangeSource`].
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_LOG_LIMIT, DEFAULT_POLL_WINDOW)
    }

    pub fn with_limits(log_limit: usize, poll_window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                changed: Notify::new(),
                log_limit: log_limit.max(1),
                poll_window,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_token(token: &ResumeToken) -> TaskResult<u64> {
    token
        .as_str()
        .parse()
        .map_err(|_| TaskError::feed(format!("malformed resume token: {}", token)))
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn ping(&self) -> TaskResult<()> {
        Ok(())
    }

    async fn insert(&self, body: Document) -> TaskResult<Committed<InsertOneResult>> {
        let id = TaskId::new();
        let document = prepare_insert(body, &id, Utc::now());
        let record = {
            let mut state = self.shared.lock();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.documents.insert(id, (seq, document.clone()));
            state.order.insert(seq, id);
            state.append(self.shared.log_limit, |token| {
                ChangeRecord::insert(token, id.to_string(), document)
            })
        };
        self.shared.changed.notify_waiters();
        Ok(Committed::new(InsertOneResult::new(id), Some(record)))
    }

    async fn find_by_owner(&self, owner: &OwnerFilter) -> TaskResult<Vec<Document>> {
        let state = self.shared.lock();
        Ok(state
            .order
            .values()
            .filter_map(|id| state.documents.get(id))
            .map(|(_, document)| document)
            .filter(|document| owner.matches(document))
            .cloned()
            .collect())
    }

    async fn update_fields(
        &self,
        id: &TaskId,
        changes: Document,
    ) -> TaskResult<Committed<UpdateResult>> {
        let record = {
            let mut state = self.shared.lock();
            let Some((_, document)) = state.documents.get_mut(id) else {
                return Ok(Committed::new(UpdateResult::new(0, 0), None));
            };
            let changed = apply_changes(document, changes);
            if changed.is_empty() {
                return Ok(Committed::new(UpdateResult::new(1, 0), None));
            }
            state.append(self.shared.log_limit, |token| {
                ChangeRecord::update(token, id.to_string(), changed)
            })
        };
        self.shared.changed.notify_waiters();
        Ok(Committed::new(UpdateResult::new(1, 1), Some(record)))
    }

    async fn delete(&self, id: &TaskId) -> TaskResult<Committed<DeleteResult>> {
        let record = {
            let mut state = self.shared.lock();
            let Some((seq, _)) = state.documents.remove(id) else {
                return Ok(Committed::new(DeleteResult::new(0), None));
            };
            state.order.remove(&seq);
            state.append(self.shared.log_limit, |token| {
                ChangeRecord::delete(token, id.to_string())
            })
        };
        self.shared.changed.notify_waiters();
        Ok(Committed::new(DeleteResult::new(1), Some(record)))
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
}

#[async_trait]
impl ChangeSubscription for MemorySubscription {
    async fn next_batch(&mut self, after: &ResumeToken) -> TaskResult<Vec<ChangeRecord>> {
        let after = parse_token(after)?;
        let notified = self.shared.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let batch = self.shared.lock().changes_after(after);
        if !batch.is_empty() {
            return Ok(batch);
        }
        let _ = tokio::time::timeout(self.shared.poll_window, notified).await;
        Ok(self.shared.lock().changes_after(after))
    }
}

#[async_trait]
impl ChangeSource for MemoryStore {
    async fn subscribe(&self) -> TaskResult<Box<dyn ChangeSubscription>> {
        Ok(Box::new(MemorySubscription {
            shared: self.shared.clone(),
        }))
    }

    async fn head(&self) -> TaskResult<ResumeToken> {
        Ok(ResumeToken::new(self.shared.lock().next_token.to_string()))
    }

    async fn load_cursor(&self, listener: &str) -> TaskResult<Option<ResumeToken>> {
        Ok(self.shared.lock().cursors.get(listener).cloned())
    }

    async fn save_cursor(&self, listener: &str, token: &ResumeToken) -> TaskResult<()> {
        self.shared
            .lock()
            .cursors
            .insert(listener.to_string(), token.clone());
        Ok(())
    }

    async fn trimmed_since(&self, after: &ResumeToken) -> TaskResult<u64> {
        let after = parse_token(after)?;
        let oldest = self.shared.lock().oldest_retained();
        Ok(oldest.saturating_sub(after + 1))
    }
}
