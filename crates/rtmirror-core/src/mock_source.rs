//! Mock remote source for testing
//!
//! Provides an in-memory ordered keyspace implementing [`RemoteSource`] so
//! backfill and tail logic can be exercised without a network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rtmirror_core::{MockSource, RemoteSource};
//! use serde_json::json;
//!
//! let source = MockSource::new();
//! source.insert("k1", json!({"fechaHora": "t", "sensores": {"a": 1}})).await;
//!
//! let batch = source.fetch_after(None, 10).await.unwrap();
//! assert_eq!(batch.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::entry::{OrderedKey, RemoteEntry, is_after};
use crate::error::SourceError;
use crate::source::{RemoteSource, SUBSCRIPTION_BUFFER, Subscription};

/// A live subscriber of the mock keyspace
struct MockSubscriber {
    /// Last key delivered, or the subscription bound
    last_key: Option<String>,
    /// Delivery channel
    tx: mpsc::Sender<Result<RemoteEntry, SourceError>>,
}

/// An in-memory ordered keyspace
#[derive(Default)]
pub struct MockSource {
    /// Children of the keyspace
    entries: RwLock<BTreeMap<OrderedKey, Value>>,
    /// Open subscriptions
    subscribers: Mutex<Vec<MockSubscriber>>,
    /// `start_after` bound of every range query, in call order
    fetch_log: Mutex<Vec<Option<String>>>,
    /// `start_after` bound of every subscription, in call order
    subscribe_log: Mutex<Vec<Option<String>>>,
    /// Number of range queries served
    fetch_calls: AtomicUsize,
    /// Number of upcoming range queries that must fail
    failing_fetches: AtomicUsize,
    /// Number of upcoming subscribe calls that must fail
    failing_subscribes: AtomicUsize,
}

impl MockSource {
    /// Create an empty keyspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a keyspace pre-populated with entries
    pub fn with_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let map = entries
            .into_iter()
            .map(|(k, v)| (OrderedKey(k.into()), v))
            .collect();
        Self {
            entries: RwLock::new(map),
            ..Default::default()
        }
    }

    /// Insert (or overwrite) a child and notify subscribers
    pub async fn insert(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.entries
            .write()
            .await
            .insert(OrderedKey(key.clone()), value.clone());

        let mut subscribers = self.subscribers.lock().await;
        let mut live = Vec::with_capacity(subscribers.len());
        for mut sub in subscribers.drain(..) {
            if !is_after(&key, sub.last_key.as_deref()) {
                live.push(sub);
                continue;
            }
            let entry = RemoteEntry::new(key.clone(), value.clone());
            if sub.tx.send(Ok(entry)).await.is_ok() {
                sub.last_key = Some(key.clone());
                live.push(sub);
            }
        }
        *subscribers = live;
    }

    /// Drop every open subscription, as a transport disconnect would
    pub async fn disconnect_all(&self) {
        self.subscribers.lock().await.clear();
    }

    /// Push an error into every open subscription
    pub async fn fail_subscriptions(&self, error: impl Fn() -> SourceError) {
        let subscribers = self.subscribers.lock().await;
        for sub in subscribers.iter() {
            let _ = sub.tx.send(Err(error())).await;
        }
    }

    /// Make the next `count` range queries fail
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` subscribe calls fail
    pub fn fail_next_subscribes(&self, count: usize) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// Number of range queries served so far (failed ones included)
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Bounds used by every range query so far
    pub async fn fetch_bounds(&self) -> Vec<Option<String>> {
        self.fetch_log.lock().await.clone()
    }

    /// Bounds used by every subscribe call so far
    pub async fn subscribe_bounds(&self) -> Vec<Option<String>> {
        self.subscribe_log.lock().await.clone()
    }

    /// Number of currently open subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Number of children in the keyspace
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the keyspace is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    async fn fetch_after(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RemoteEntry>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_log
            .lock()
            .await
            .push(start_after.map(str::to_string));

        if Self::take_failure(&self.failing_fetches) {
            return Err(SourceError::Http("mock fetch failure".into()));
        }

        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, _)| is_after(k.as_str(), start_after))
            .take(limit)
            .map(|(k, v)| RemoteEntry::new(k.as_str(), v.clone()))
            .collect())
    }

    async fn subscribe(&self, start_after: Option<&str>) -> Result<Subscription, SourceError> {
        self.subscribe_log
            .lock()
            .await
            .push(start_after.map(str::to_string));

        if Self::take_failure(&self.failing_subscribes) {
            return Err(SourceError::Http("mock subscribe failure".into()));
        }

        // Hold the subscriber list while snapshotting so no insert can slip
        // between the snapshot and the registration.
        let mut subscribers = self.subscribers.lock().await;
        let entries = self.entries.read().await;
        let snapshot: Vec<RemoteEntry> = entries
            .iter()
            .filter(|(k, _)| is_after(k.as_str(), start_after))
            .map(|(k, v)| RemoteEntry::new(k.as_str(), v.clone()))
            .collect();
        drop(entries);

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER + snapshot.len());
        let mut last_key = start_after.map(str::to_string);
        for entry in snapshot {
            last_key = Some(entry.key.clone());
            // Capacity covers the snapshot, so this cannot fail
            let _ = tx.try_send(Ok(entry));
        }

        subscribers.push(MockSubscriber { last_key, tx });
        Ok(Subscription::new(rx, None))
    }
}
