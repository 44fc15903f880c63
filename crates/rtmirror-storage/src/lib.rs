//! # rtmirror Storage
//!
//! Local persistence for the replication engine.
//!
//! ## Features
//!
//! - **CursorStore**: Durable single-value store for the last replicated key
//! - **DedupIndex**: Bounded in-memory set of recently replicated ids
//! - **AppendLog**: Append-only JSON-lines log, the system of record for reads
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rtmirror_core::RecordSchema;
//! use rtmirror_storage::{AppendLog, AppendLogConfig, CursorStore, DedupIndex};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dedup = Arc::new(DedupIndex::new());
//!     let log = AppendLog::open(
//!         AppendLogConfig::with_path("cache.jsonl"),
//!         RecordSchema::default(),
//!         dedup.clone(),
//!     )
//!     .await
//!     .unwrap();
//!
//!     // Warm the dedup index from the newest records
//!     dedup.warm_from_tail(&log, 2000, 200 * 1024).await.unwrap();
//!
//!     let cursor = CursorStore::new("last-key.txt");
//!     println!("resuming after {:?}", cursor.load().await);
//! }
//! ```

pub mod append_log;
pub mod cursor;
pub mod dedup;
pub mod error;

// Re-exports
pub use append_log::{AppendLog, AppendLogConfig, AppendOutcome, LogStats};
pub use cursor::CursorStore;
pub use dedup::{DEFAULT_DEDUP_CEILING, DEFAULT_DEDUP_TARGET, DEFAULT_WARM_WINDOW_BYTES, DedupIndex};
pub use error::StorageError;
