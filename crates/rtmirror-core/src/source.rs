//! Remote source abstraction
//!
//! The [`RemoteSource`] trait is the seam between the replication engine
//! and the remote ordered keyspace. It provides exactly two primitives:
//!
//! - a range query by key, ascending, with an exclusive lower bound and a
//!   result-count limit (used by backfill)
//! - a subscription that delivers each newly created child exactly once,
//!   in creation order, strictly after an optional bound (used by tail)
//!
//! ## Implementations
//!
//! - [`MockSource`](crate::MockSource): In-memory source for testing
//! - `FirebaseSource`: Realtime Database REST API (in rtmirror-transport)

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::RemoteEntry;
use crate::error::SourceError;

/// Channel capacity used by subscriptions
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// An ordered remote keyspace
///
/// # Example
///
/// ```rust,ignore
/// use rtmirror_core::{MockSource, RemoteSource};
///
/// let source = MockSource::new();
/// let batch = source.fetch_after(None, 300).await?;
/// let mut live = source.subscribe(batch.last().map(|e| e.key.as_str())).await?;
/// while let Some(item) = live.next().await {
///     println!("{:?}", item?);
/// }
/// ```
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch up to `limit` entries in ascending key order, strictly after
    /// `start_after` (or from the start of the keyspace when `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cannot be reached or answers with
    /// something that is not a keyspace snapshot.
    async fn fetch_after(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RemoteEntry>, SourceError>;

    /// Subscribe to children created strictly after `start_after`.
    ///
    /// Children already present after the bound are delivered first, then
    /// new ones as they appear. The subscription ends (yields `None`) when
    /// the underlying transport disconnects; an `Err` item reports why.
    async fn subscribe(&self, start_after: Option<&str>) -> Result<Subscription, SourceError>;
}

/// A live stream of remote entries
///
/// Items are produced by a background task and consumed through a single
/// receiver. Dropping the subscription aborts the producer.
pub struct Subscription {
    rx: mpsc::Receiver<Result<RemoteEntry, SourceError>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a receiver, optionally owning the task that feeds it
    pub fn new(
        rx: mpsc::Receiver<Result<RemoteEntry, SourceError>>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { rx, task }
    }

    /// Wait for the next item; `None` once the stream has ended
    pub async fn next(&mut self) -> Option<Result<RemoteEntry, SourceError>> {
        self.rx.recv().await
    }

    /// Stop the producer and close the stream
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}
