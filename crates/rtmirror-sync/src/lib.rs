//! # rtmirror Sync
//!
//! Replication engine: moves remote entries into the local append log.
//!
//! ## Components
//!
//! - [`BackfillEngine`]: bounded, resumable batch replication of history
//! - [`TailSubscriber`]: live replication of new entries with re-subscribe
//! - [`ReclaimTask`]: periodic dedup index compaction
//! - [`Replicator`]: startup ordering and task ownership
//!
//! ## Example
//!
//! ```rust,ignore
//! use rtmirror_sync::{Replicator, SyncConfig};
//!
//! let replicator = Replicator::new(source, log, cursor, SyncConfig::default());
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//! let tasks = replicator.spawn(&shutdown_tx);
//! // ...
//! let _ = shutdown_tx.send(());
//! tasks.join().await;
//! ```

pub mod backfill;
pub mod config;
pub mod error;
pub mod reclaim;
pub mod replicator;
pub mod tail;

pub use backfill::{BackfillEngine, BackfillReport, StopReason};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use reclaim::ReclaimTask;
pub use replicator::{ReplicationTasks, Replicator};
pub use tail::TailSubscriber;
