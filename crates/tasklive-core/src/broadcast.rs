//! Broadcast channel for real-time WebSocket updates.
//!
//! Uses a tokio broadcast channel for in-process fan-out. Delivery is
//! fire-and-forget: a subscriber that falls behind loses the oldest frames
//! instead of slowing the others down.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

use crate::change::{ChangeNotification, ChangeRecord};

/// Default channel capacity per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// How many idempotency keys are remembered.
const RECENT_KEYS: usize = 4096;

/// One event as sent to clients: `{"type": <event>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub event: String,
    pub data: Value,
}

impl Frame {
    pub fn to_json(&self) -> String {
        // A Frame is a string plus a JSON value; serializing it cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Which code paths announce a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmissionPolicy {
    /// The change feed is the only emitter.
    #[default]
    Feed,
    /// Insert and category-update handlers also emit; duplicates collapse on the
    /// change token.
    Dual,
}

impl EmissionPolicy {
    pub fn handler_emits(&self) -> bool {
        matches!(self, Self::Dual)
    }
}

impl FromStr for EmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feed" => Ok(Self::Feed),
            "dual" => Ok(Self::Dual),
            other => Err(format!("unknown emission policy '{}' (expected feed or dual)", other)),
        }
    }
}

impl fmt::Display for EmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feed => f.write_str("feed"),
            Self::Dual => f.write_str("dual"),
        }
    }
}

/// Bounded memory of recently published keys.
struct RecentKeys {
    order: VecDeque<String>,
    seen: HashSet<String>,
    limit: usize,
}

impl RecentKeys {
    fn new(limit: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(limit),
            seen: HashSet::with_capacity(limit),
            limit,
        }
    }

    /// Record `key`; false if it was already present.
    fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() == self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.to_string());
        self.seen.insert(key.to_string());
        true
    }
}

/// Fan-out of frames to every connected client.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<Frame>>,
    recent: Arc<Mutex<RecentKeys>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: Arc::new(Mutex::new(RecentKeys::new(RECENT_KEYS))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send `payload` under `event` to all current subscribers.
    ///
    /// Returns how many subscribers the frame was queued for.
    pub fn publish(&self, event: &str, payload: Value) -> usize {
        let frame = Arc::new(Frame {
            event: event.to_string(),
            data: payload,
        });
        match self.tx.send(frame) {
            Ok(count) => {
                debug!(event, receivers = count, "Broadcast frame");
                count
            }
            Err(_) => {
                debug!(event, "No subscribers, frame dropped");
                0
            }
        }
    }

    /// Publish unless a frame with the same key already went out.
    ///
    /// Returns `None` for a duplicate.
    pub fn publish_once(&self, key: &str, event: &str, payload: Value) -> Option<usize> {
        let fresh = {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            recent.insert(key)
        };
        if !fresh {
            debug!(key, event, "Duplicate notification suppressed");
            return None;
        }
        Some(self.publish(event, payload))
    }

    /// Announce a committed change, keyed on its stream token.
    ///
    /// Returns false when the record was not announced (ignored kind or duplicate).
    pub fn announce(&self, record: &ChangeRecord) -> bool {
        match ChangeNotification::from_record(record) {
            Some(notification) => self
                .publish_once(
                    record.token.as_str(),
                    notification.event_name(),
                    notification.payload(),
                )
                .is_some(),
            None => {
                debug!(op = record.op.as_str(), token = %record.token, "Ignoring change record");
                false
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
