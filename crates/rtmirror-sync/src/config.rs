//! Replication tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

use rtmirror_storage::{DEFAULT_DEDUP_CEILING, DEFAULT_DEDUP_TARGET, DEFAULT_WARM_WINDOW_BYTES};

/// Tuning knobs for backfill, tail, and reclamation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entries requested per backfill batch
    pub batch_size: usize,
    /// Safety ceiling on batches per backfill run
    pub max_batches: usize,
    /// Pause after every this many batches (0 disables)
    pub yield_every: usize,
    /// Length of the cooperative pause
    pub yield_pause_ms: u64,
    /// Ids loaded into the dedup index on warm start
    pub warm_count: usize,
    /// Bytes read from the end of the log on warm start
    pub warm_window_bytes: u64,
    /// Dedup index size that triggers compaction
    pub dedup_ceiling: usize,
    /// Dedup index size after compaction
    pub dedup_target: usize,
    /// Period of the reclamation loop
    pub reclaim_interval_secs: u64,
    /// First re-subscribe delay after the live stream drops
    pub resubscribe_initial_ms: u64,
    /// Upper bound on the re-subscribe delay
    pub resubscribe_max_backoff_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 300,
            max_batches: 20,
            yield_every: 5,
            yield_pause_ms: 100,
            warm_count: 2000,
            warm_window_bytes: DEFAULT_WARM_WINDOW_BYTES,
            dedup_ceiling: DEFAULT_DEDUP_CEILING,
            dedup_target: DEFAULT_DEDUP_TARGET,
            reclaim_interval_secs: 300,
            resubscribe_initial_ms: 1000,
            resubscribe_max_backoff_secs: 64,
        }
    }
}

impl SyncConfig {
    /// Length of the cooperative pause between batches
    pub fn yield_pause(&self) -> Duration {
        Duration::from_millis(self.yield_pause_ms)
    }

    /// Period of the reclamation loop
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }

    /// Re-subscribe delay after `failures` consecutive failures: the initial
    /// delay doubled per failure, capped at the configured maximum.
    pub fn resubscribe_backoff(&self, failures: u32) -> Duration {
        let initial = Duration::from_millis(self.resubscribe_initial_ms);
        let max = Duration::from_secs(self.resubscribe_max_backoff_secs);
        initial
            .saturating_mul(2u32.saturating_pow(failures.min(16)))
            .min(max)
    }
}
