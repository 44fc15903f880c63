//! Bounded historical backfill
//!
//! Drains remote history in fixed-size batches, starting strictly after
//! the persisted cursor. Each run is best effort: it stops when history is
//! exhausted, when the batch ceiling is reached, or at the first failure,
//! and never retries within the same run.
//!
//! Two positions are tracked during a run:
//!
//! - the *page key*, the last key fetched, which bounds the next request
//! - the *cursor*, the last key appended or found already present, which
//!   is persisted once per batch
//!
//! Invalid entries advance the page key but not the cursor, so they never
//! stall pagination and the cursor always names a replicated record.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, trace, warn};

use rtmirror_core::{Record, RemoteSource, compare_keys};
use rtmirror_storage::{AppendLog, AppendOutcome, CursorStore};

use crate::config::SyncConfig;

/// Why a backfill run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The remote returned an empty or short batch
    Exhausted,
    /// The batch ceiling was reached; more history may remain
    BatchLimit,
    /// A range query failed
    FetchError,
    /// A record could not be written
    AppendError,
}

/// Summary of one backfill run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Cursor the run started from
    pub started_after: Option<String>,
    /// Non-empty batches processed
    pub batches: usize,
    /// Entries received from the remote
    pub fetched: usize,
    /// Records written to the log
    pub appended: usize,
    /// Records already present in the log
    pub duplicates: usize,
    /// Entries dropped by the validity rule
    pub invalid: usize,
    /// Cursor at the end of the run
    pub cursor: Option<String>,
    pub stop_reason: StopReason,
    /// Failure that ended the run, if any
    pub error: Option<String>,
}

impl BackfillReport {
    fn new(started_after: Option<String>) -> Self {
        Self {
            cursor: started_after.clone(),
            started_after,
            batches: 0,
            fetched: 0,
            appended: 0,
            duplicates: 0,
            invalid: 0,
            stop_reason: StopReason::Exhausted,
            error: None,
        }
    }

    /// Whether the run ended because of a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self.stop_reason,
            StopReason::FetchError | StopReason::AppendError
        )
    }
}

/// Batch-wise replicator of remote history
pub struct BackfillEngine {
    source: Arc<dyn RemoteSource>,
    log: Arc<AppendLog>,
    cursor: Arc<CursorStore>,
    config: SyncConfig,
}

impl BackfillEngine {
    /// Create an engine over a source, a log, and a cursor store
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

    /// Run one backfill pass.
    ///
    /// Failures do not surface as errors: they end the run and are
    /// recorded in the returned report. Progress up to the last completed
    /// entry is persisted either way.
    #[instrument(skip(self), fields(batch_size = self.config.batch_size))]
    pub async fn run(&self) -> BackfillReport {
        let start = self.cursor.load().await;
        info!(start_after = ?start, "Backfill started");

        let mut report = BackfillReport::new(start.clone());
        let mut page_after = start.clone();
        let mut cursor = start;

        loop {
            if report.batches >= self.config.max_batches {
                info!(batches = report.batches, "Backfill batch limit reached");
                report.stop_reason = StopReason::BatchLimit;
                break;
            }

            let mut batch = match self
                .source
                .fetch_after(page_after.as_deref(), self.config.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, after = ?page_after, "Backfill fetch failed, aborting run");
                    report.stop_reason = StopReason::FetchError;
                    report.error = Some(e.to_string());
                    break;
                }
            };

            if batch.is_empty() {
                debug!("Remote history exhausted");
                report.stop_reason = StopReason::Exhausted;
                break;
            }

            let short = batch.len() < self.config.batch_size;
            batch.sort_by(|a, b| compare_keys(&a.key, &b.key));
            report.fetched += batch.len();
            debug!(count = batch.len(), after = ?page_after, "Fetched batch");

            let batch_start = cursor.clone();
            let mut failure = None;
            for entry in batch {
                page_after = Some(entry.key.clone());

                let Some(record) = Record::from_entry(entry) else {
                    trace!(key = ?page_after, "Dropping non-object entry");
                    report.invalid += 1;
                    continue;
                };

                match self.log.append(&record).await {
                    Ok(AppendOutcome::Appended) => {
                        report.appended += 1;
                        cursor = Some(record.id);
                    }
                    Ok(AppendOutcome::Duplicate) => {
                        report.duplicates += 1;
                        cursor = Some(record.id);
                    }
                    Ok(AppendOutcome::Invalid) => report.invalid += 1,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            if cursor != batch_start
                && let Some(position) = cursor.as_deref()
                && let Err(e) = self.cursor.save(position).await
            {
                // Next start re-fetches this batch; dedup absorbs it
                warn!(error = %e, cursor = position, "Failed to persist cursor");
            }

            report.batches += 1;

            if let Some(e) = failure {
                error!(error = %e, cursor = ?cursor, "Append failed, aborting backfill");
                report.stop_reason = StopReason::AppendError;
                report.error = Some(e.to_string());
                break;
            }

            if short {
                report.stop_reason = StopReason::Exhausted;
                break;
            }

            if self.config.yield_every > 0 && report.batches % self.config.yield_every == 0 {
                trace!(batches = report.batches, "Yielding between batches");
                tokio::time::sleep(self.config.yield_pause()).await;
            }
        }

        report.cursor = cursor;
        info!(
            batches = report.batches,
            fetched = report.fetched,
            appended = report.appended,
            duplicates = report.duplicates,
            invalid = report.invalid,
            cursor = ?report.cursor,
            stop_reason = ?report.stop_reason,
            "Backfill finished"
        );
        report
    }
}
