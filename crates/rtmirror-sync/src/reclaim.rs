//! Periodic dedup index reclamation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use rtmirror_storage::DedupIndex;

/// Background task trimming the dedup index back under its ceiling
pub struct ReclaimTask {
    dedup: Arc<DedupIndex>,
    period: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ReclaimTask {
    pub fn new(dedup: Arc<DedupIndex>, period: Duration, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self {
            dedup,
            period,
            shutdown_rx,
        }
    }

    /// Spawn the loop as a background task
    pub fn spawn(
        dedup: Arc<DedupIndex>,
        period: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(dedup, period, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    /// Run one tick: compact if over the ceiling
    pub fn tick(&self) -> Option<usize> {
        let removed = self.dedup.reclaim();
        if removed.is_none() {
            debug!(size = self.dedup.len(), ceiling = self.dedup.ceiling(), "Dedup index within bounds");
        }
        removed
    }

    async fn run(mut self) {
        info!(period_secs = self.period.as_secs(), "Reclamation loop started");

        // First tick one period from now, not immediately
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Reclamation loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
    }
}
