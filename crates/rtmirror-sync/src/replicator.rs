//! Replication orchestration
//!
//! Ties the pieces together in startup order:
//!
//! 1. warm the dedup index from the log tail
//! 2. start the reclamation loop
//! 3. backfill remote history
//! 4. hand over to the live tail for the rest of the process lifetime
//!
//! All producers share one [`AppendLog`], so there is one writer at a time.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use rtmirror_core::RemoteSource;
use rtmirror_storage::{AppendLog, CursorStore};

use crate::backfill::{BackfillEngine, BackfillReport};
use crate::config::SyncConfig;
use crate::reclaim::ReclaimTask;
use crate::tail::TailSubscriber;

/// Handles of the background replication tasks
pub struct ReplicationTasks {
    /// Backfill followed by the live tail
    pub replication: JoinHandle<()>,
    /// Dedup reclamation loop
    pub reclaim: JoinHandle<()>,
}

impl ReplicationTasks {
    /// Wait for both tasks to finish (after shutdown has been signalled)
    pub async fn join(self) {
        if let Err(e) = self.replication.await {
            warn!(error = %e, "Replication task ended abnormally");
        }
        if let Err(e) = self.reclaim.await {
            warn!(error = %e, "Reclamation task ended abnormally");
        }
    }
}

/// Owns everything replication needs
#[derive(Clone)]
pub struct Replicator {
    source: Arc<dyn RemoteSource>,
    log: Arc<AppendLog>,
    cursor: Arc<CursorStore>,
    config: SyncConfig,
}

impl Replicator {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        log: Arc<AppendLog>,
        cursor: Arc<CursorStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            log,
            cursor,
            config,
        }
    }

    /// The shared log
    pub fn log(&self) -> &Arc<AppendLog> {
        &self.log
    }

    /// The shared cursor store
    pub fn cursor(&self) -> &Arc<CursorStore> {
        &self.cursor
    }

    /// Seed the dedup index from the newest log lines.
    ///
    /// A read failure leaves the index empty; the append path then relies
    /// on ids registered during this run.
    pub async fn warm(&self) -> usize {
        match self
            .log
            .dedup()
            .warm_from_tail(&self.log, self.config.warm_count, self.config.warm_window_bytes)
            .await
        {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Failed to warm dedup index, starting empty");
                0
            }
        }
    }

    /// Run a single backfill pass
    pub async fn backfill(&self) -> BackfillReport {
        BackfillEngine::new(
            self.source.clone(),
            self.log.clone(),
            self.cursor.clone(),
            self.config.clone(),
        )
        .run()
        .await
    }

    /// Start replication in the background.
    ///
    /// Every task listens on `shutdown`; send on it to stop them.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> ReplicationTasks {
        let reclaim = ReclaimTask::spawn(
            self.log.dedup().clone(),
            self.config.reclaim_interval(),
            shutdown.subscribe(),
        );

        let mut shutdown_rx = shutdown.subscribe();
        let replication = tokio::spawn(async move {
            let warmed = self.warm().await;
            info!(warmed, "Replication starting");

            // Progress is persisted per batch, so abandoning a run is safe
            let report = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown during backfill");
                    return;
                }
                report = self.backfill() => report,
            };
            if report.is_failure() {
                warn!(stop_reason = ?report.stop_reason, "Backfill incomplete, live tail continues from persisted cursor");
            }

            TailSubscriber::new(
                self.source,
                self.log,
                self.cursor,
                self.config,
                shutdown_rx,
            )
            .run()
            .await;
        });

        ReplicationTasks {
            replication,
            reclaim,
        }
    }
}
