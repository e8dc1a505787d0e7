//! Application state.

use axum::http::HeaderValue;
use std::sync::Arc;
use tasklive_core::{Broadcaster, Committed, EmissionPolicy, TaskStore};
use tokio::sync::watch;
use tracing::debug;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub broadcaster: Broadcaster,
    pub policy: EmissionPolicy,
    pub allowed_origins: Arc<Vec<HeaderValue>>,
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broadcaster: Broadcaster,
        policy: EmissionPolicy,
        allowed_origins: Vec<HeaderValue>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            policy,
            allowed_origins: Arc::new(allowed_origins),
            shutdown,
        }
    }

    pub fn origin_allowed(&self, origin: &HeaderValue) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    /// Announce a committed write from the handler, when the policy asks for it.
    ///
    /// Best-effort: never fails the request.
    pub fn announce<T>(&self, committed: &Committed<T>) {
        if !self.policy.handler_emits() {
            return;
        }
        if let Some(record) = &committed.change {
            let sent = self.broadcaster.announce(record);
            debug!(token = %record.token, sent, "Handler-side announcement");
        }
    }
}
