//! # rtmirror Core
//!
//! Core traits, types, and errors for the rtmirror replication stack.
//!
//! This crate provides the abstractions shared by the storage, sync, and
//! server crates so that the same replication logic runs against both the
//! real remote database and an in-memory mock in tests.
//!
//! ## Key Traits
//!
//! - [`RemoteSource`]: Ordered keyspace with range queries and a live
//!   child-added subscription
//!
//! ## Key Types
//!
//! - [`Record`]: A replicated entry, `id` plus the remote fields
//! - [`RecordSchema`]: Names of the timestamp and payload fields that make a
//!   record eligible for persistence
//! - [`RemoteEntry`]: A raw `(key, value)` pair as delivered by a source
//! - [`OrderedKey`]: Key wrapper implementing the remote key ordering
//! - [`MockSource`]: In-memory [`RemoteSource`] for tests

pub mod entry;
pub mod error;
pub mod mock_source;
pub mod record;
pub mod source;

// Re-export main types
pub use entry::{OrderedKey, RemoteEntry, compare_keys, is_after};
pub use error::SourceError;
pub use mock_source::MockSource;
pub use record::{Record, RecordSchema, is_present};
pub use source::{RemoteSource, SUBSCRIPTION_BUFFER, Subscription};
