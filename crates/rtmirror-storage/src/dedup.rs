//! Bounded dedup index
//!
//! Holds the ids of recently replicated records so the append path can
//! skip duplicates without touching disk. Membership implies the record is
//! already durable; a missing id only means we cannot tell, and the append
//! log tolerates the rare redundant line that results.
//!
//! The index is capacity-bounded: once it grows past its ceiling it is
//! trimmed back to the most recently inserted ids. Insertion order, not
//! access order, decides what is evicted.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use rtmirror_core::Record;

use crate::append_log::AppendLog;
use crate::error::StorageError;

/// Default soft ceiling before compaction kicks in
pub const DEFAULT_DEDUP_CEILING: usize = 5000;

/// Default number of ids retained by compaction and warm start
pub const DEFAULT_DEDUP_TARGET: usize = 2000;

/// Default byte window scanned from the log tail on warm start
pub const DEFAULT_WARM_WINDOW_BYTES: u64 = 200 * 1024;

#[derive(Debug, Default)]
struct DedupInner {
    ids: HashSet<String>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
}

/// In-memory set of recently seen record ids
#[derive(Debug)]
pub struct DedupIndex {
    inner: Mutex<DedupInner>,
    ceiling: usize,
    target: usize,
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupIndex {
    /// Create an index with the default ceiling and target
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_DEDUP_CEILING, DEFAULT_DEDUP_TARGET)
    }

    /// Create an index with a custom ceiling and compaction target
    pub fn with_limits(ceiling: usize, target: usize) -> Self {
        Self {
            inner: Mutex::new(DedupInner::default()),
            ceiling,
            target: target.min(ceiling),
        }
    }

    /// Soft ceiling above which [`reclaim`](Self::reclaim) compacts
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Number of ids kept by [`reclaim`](Self::reclaim)
    pub fn target(&self) -> usize {
        self.target
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }

    /// Insert an id; returns false if it was already present
    pub fn add(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.ids.contains(id) {
            return false;
        }
        inner.ids.insert(id.to_string());
        inner.order.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the `target_count` most recently inserted ids.
    ///
    /// Returns the number of ids discarded.
    pub fn compact(&self, target_count: usize) -> usize {
        let mut inner = self.inner.lock();
        let excess = inner.order.len().saturating_sub(target_count);
        if excess == 0 {
            return 0;
        }

        let retained: VecDeque<String> = inner.order.split_off(excess);
        let ids: HashSet<String> = retained.iter().cloned().collect();
        inner.order = retained;
        inner.ids = ids;
        excess
    }

    /// Compact to the configured target if the ceiling has been exceeded.
    ///
    /// Returns the number of ids discarded, `None` if nothing was done.
    pub fn reclaim(&self) -> Option<usize> {
        let size = self.len();
        if size <= self.ceiling {
            return None;
        }
        let removed = self.compact(self.target);
        info!(
            before = size,
            after = size - removed,
            removed,
            "Dedup index compacted"
        );
        Some(removed)
    }

    /// Seed the index from the most recent records of the log.
    ///
    /// Reads at most `window_bytes` from the end of the log, so startup
    /// cost does not grow with log size, and inserts the ids of up to
    /// `max_count` of the newest well-formed lines, oldest first.
    #[instrument(skip(self, log))]
    pub async fn warm_from_tail(
        &self,
        log: &AppendLog,
        max_count: usize,
        window_bytes: u64,
    ) -> Result<usize, StorageError> {
        let lines = log.read_tail(window_bytes).await?;
        let skip = lines.len().saturating_sub(max_count);

        let mut loaded = 0;
        let mut corrupt = 0;
        for line in &lines[skip..] {
            match Record::from_line(line) {
                Ok(record) if !record.id.is_empty() => {
                    self.add(&record.id);
                    loaded += 1;
                }
                Ok(_) => corrupt += 1,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable line during warm start");
                    corrupt += 1;
                }
            }
        }

        if corrupt > 0 {
            warn!(corrupt, "Ignored corrupt lines in log tail");
        }
        info!(loaded, size = self.len(), "Dedup index warmed from log tail");
        Ok(loaded)
    }
}
