//! Live tail subscription
//!
//! After backfill, the tail subscriber watches the remote keyspace for
//! children created strictly after the persisted cursor. Every item goes
//! through the same append path as backfill and the cursor is persisted
//! per appended item.
//!
//! When the stream ends or fails, the subscriber waits (exponential
//! backoff, reset whenever an item gets through) and subscribes again,
//! reloading the bound from the cursor store rather than trusting any
//! in-memory position.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use rtmirror_core::{Record, RemoteEntry, RemoteSource, Subscription};
use rtmirror_storage::{AppendLog, AppendOutcome, CursorStore};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// How a subscription came to an end
#[derive(Debug)]
enum StreamExit {
    /// Shutdown was signalled
    Shutdown,
    /// The transport closed the stream
    Ended,
    /// The stream reported an error, or an item could not be stored
    Failed(SyncError),
}

/// Long-running live replication task
pub struct TailSubscriber {
    source: Arc<dyn RemoteSource>,
    log: Arc<AppendLog>,
    cursor: Arc<CursorStore>,
    config: SyncConfig,
    shutdown_rx: broadcast::Receiver<()>,
    /// Consecutive subscriptions that delivered nothing
    failures: u32,
}

impl TailSubscriber {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        log: Arc<AppendLog>,
        cursor: Arc<CursorStore>,
        config: SyncConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            source,
            log,
            cursor,
            config,
            shutdown_rx,
            failures: 0,
        }
    }

    /// Spawn the subscriber as a background task
    pub fn spawn(
        source: Arc<dyn RemoteSource>,
        log: Arc<AppendLog>,
        cursor: Arc<CursorStore>,
        config: SyncConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(source, log, cursor, config, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    /// Subscribe and keep re-subscribing until shutdown
    pub async fn run(mut self) {
        info!("Live tail started");

        loop {
            let start = self.cursor.load().await;

            let subscribed = tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                result = self.source.subscribe(start.as_deref()) => result,
            };

            match subscribed {
                Ok(mut subscription) => {
                    info!(start_after = ?start, "Live tail subscribed");
                    match self.consume(&mut subscription).await {
                        StreamExit::Shutdown => break,
                        StreamExit::Ended => warn!("Live tail stream ended"),
                        StreamExit::Failed(e) => warn!(error = %e, "Live tail stream failed"),
                    }
                }
                Err(e) => warn!(error = %e, start_after = ?start, "Live tail subscribe failed"),
            }

            let delay = self.config.resubscribe_backoff(self.failures);
            self.failures = self.failures.saturating_add(1);
            info!(delay_ms = delay.as_millis() as u64, "Re-subscribing live tail");

            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Live tail shutting down");
    }

    /// Drain a subscription until it ends, fails, or shutdown is signalled
    async fn consume(&mut self, subscription: &mut Subscription) -> StreamExit {
        loop {
            let item = tokio::select! {
                _ = self.shutdown_rx.recv() => return StreamExit::Shutdown,
                item = subscription.next() => item,
            };

            match item {
                Some(Ok(entry)) => {
                    if let Err(e) = self.apply(entry).await {
                        // Dropping the stream makes the next subscription
                        // redeliver this item from the persisted cursor
                        return StreamExit::Failed(e);
                    }
                    self.failures = 0;
                }
                Some(Err(e)) => return StreamExit::Failed(e.into()),
                None => return StreamExit::Ended,
            }
        }
    }

    /// Validate, append, and persist the cursor for one live item
    #[instrument(skip(self, entry), fields(key = %entry.key))]
    async fn apply(&self, entry: RemoteEntry) -> SyncResult<AppendOutcome> {
        let Some(record) = Record::from_entry(entry) else {
            trace!("Dropping non-object entry");
            return Ok(AppendOutcome::Invalid);
        };

        let outcome = match self.log.append(&record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Failed to append live record");
                return Err(e.into());
            }
        };

        if outcome == AppendOutcome::Appended {
            if let Err(e) = self.cursor.save(&record.id).await {
                warn!(error = %e, "Failed to persist cursor");
            }
        } else {
            debug!(?outcome, "Live record not appended");
        }
        Ok(outcome)
    }
}
