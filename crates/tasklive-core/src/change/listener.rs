//! Change feed listener.
//!
//! Holds the process-wide subscription on the task collection's change stream
//! and turns every committed mutation into a broadcast. The position of the last
//! processed entry is persisted after each event so a restart resumes where the
//! previous process stopped.
//!
//! History is bounded. Entries trimmed before the listener reached them cannot
//! be replayed; every resume checks for such a gap and reports its size.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{ChangeRecord, ChangeSource, ChangeSubscription, ResumeToken};
use crate::broadcast::Broadcaster;
use crate::error::TaskResult;

/// Capped exponential reconnect delay.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

pub struct ChangeFeedListener {
    name: String,
    source: Arc<dyn ChangeSource>,
    broadcaster: Broadcaster,
    subscription: Option<Box<dyn ChangeSubscription>>,
    position: ResumeToken,
    backoff: Backoff,
    failures: u32,
    missed: u64,
}

impl ChangeFeedListener {
    /// Open the subscription and resolve the starting position.
    ///
    /// Any failure here is a startup failure and is returned to the caller.
    pub async fn open(
        name: impl Into<String>,
        source: Arc<dyn ChangeSource>,
        broadcaster: Broadcaster,
    ) -> TaskResult<Self> {
        let name = name.into();
        let subscription = source.subscribe().await?;
        let (position, resumed) = match source.load_cursor(&name).await? {
            Some(cursor) => {
                info!(listener = %name, cursor = %cursor, "Resuming change feed from saved cursor");
                (cursor, true)
            }
            None => {
                let head = source.head().await?;
                info!(listener = %name, head = %head, "No saved cursor, following change feed from head");
                (head, false)
            }
        };

        let mut listener = Self {
            name,
            source,
            broadcaster,
            subscription: Some(subscription),
            position,
            backoff: Backoff::default(),
            failures: 0,
            missed: 0,
        };
        if resumed {
            listener.check_trimmed().await?;
        }
        Ok(listener)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Token of the last processed entry.
    pub fn position(&self) -> &ResumeToken {
        &self.position
    }

    /// Entries lost to history trimming across all resumes so far.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    async fn check_trimmed(&mut self) -> TaskResult<()> {
        let missed = self.source.trimmed_since(&self.position).await?;
        if missed > 0 {
            self.missed = self.missed.saturating_add(missed);
            warn!(
                listener = %self.name,
                position = %self.position,
                missed,
                "Change feed history was trimmed past the resume position, events lost"
            );
        }
        Ok(())
    }

    /// Follow the stream until `shutdown` flips or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(listener = %self.name, "Change feed listener started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let batch = tokio::select! {
                _ = shutdown.changed() => break,
                batch = self.next_batch() => batch,
            };
            match batch {
                Ok(records) => {
                    self.failures = 0;
                    for record in records {
                        self.process(record).await;
                    }
                }
                Err(e) => {
                    self.subscription = None;
                    self.failures = self.failures.saturating_add(1);
                    let delay = self.backoff.delay(self.failures);
                    warn!(
                        listener = %self.name,
                        error = %e,
                        failures = self.failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Change feed read failed, reconnecting"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!(listener = %self.name, position = %self.position, "Change feed listener stopped");
    }

    async fn next_batch(&mut self) -> TaskResult<Vec<ChangeRecord>> {
        if self.subscription.is_none() {
            let subscription = self.source.subscribe().await?;
            self.check_trimmed().await?;
            info!(listener = %self.name, position = %self.position, "Change feed resubscribed");
            self.subscription = Some(subscription);
        }
        match self.subscription.as_mut() {
            Some(subscription) => subscription.next_batch(&self.position).await,
            None => Ok(Vec::new()),
        }
    }

    /// Announce one record and advance the persisted cursor past it.
    pub async fn process(&mut self, record: ChangeRecord) {
        debug!(
            listener = %self.name,
            token = %record.token,
            op = record.op.as_str(),
            task_id = %record.id,
            "Change observed"
        );
        self.broadcaster.announce(&record);
        self.position = record.token;
        if let Err(e) = self.source.save_cursor(&self.name, &self.position).await {
            error!(listener = %self.name, error = %e, "Failed to persist change feed cursor");
        }
    }
}
