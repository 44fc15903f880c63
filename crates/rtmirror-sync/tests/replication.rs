//! End-to-end replication scenarios over an in-memory source and real files

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::broadcast;

use rtmirror_core::{MockSource, Record, RecordSchema, RemoteEntry, RemoteSource, SourceError, Subscription};
use rtmirror_storage::{AppendLog, AppendLogConfig, CursorStore, DedupIndex};
use rtmirror_sync::{BackfillEngine, Replicator, StopReason, SyncConfig};

fn reading(n: usize) -> Value {
    json!({
        "fechaHora": format!("2024-03-01 10:{:02}:{:02}", n / 60 % 60, n % 60),
        "sensores": {"temperatura": 20 + n % 5, "humedad": 40}
    })
}

fn keyspace(range: std::ops::RangeInclusive<usize>) -> Vec<(String, Value)> {
    range.map(|i| (format!("k{i:03}"), reading(i))).collect()
}

struct Store {
    _dir: TempDir,
    log: Arc<AppendLog>,
    cursor: Arc<CursorStore>,
}

impl Store {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, Arc::new(DedupIndex::new())).await;
        let cursor = Arc::new(CursorStore::new(dir.path().join("last-key.txt")));
        Self {
            _dir: dir,
            log,
            cursor,
        }
    }

    /// Reopen the same files with a fresh dedup index, as a restart would
    async fn restart(self) -> Self {
        let log = open_log(&self._dir, Arc::new(DedupIndex::new())).await;
        Self { log, ..self }
    }

    fn engine(&self, source: Arc<dyn RemoteSource>, config: SyncConfig) -> BackfillEngine {
        BackfillEngine::new(source, self.log.clone(), self.cursor.clone(), config)
    }

    fn replicator(&self, source: Arc<dyn RemoteSource>, config: SyncConfig) -> Replicator {
        Replicator::new(source, self.log.clone(), self.cursor.clone(), config)
    }

    async fn ids(&self) -> Vec<String> {
        self.log
            .read_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }
}

async fn open_log(dir: &TempDir, dedup: Arc<DedupIndex>) -> Arc<AppendLog> {
    Arc::new(
        AppendLog::open(
            AppendLogConfig::with_path(dir.path().join("cache.jsonl")),
            RecordSchema::default(),
            dedup,
        )
        .await
        .unwrap(),
    )
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        yield_pause_ms: 1,
        resubscribe_initial_ms: 10,
        resubscribe_max_backoff_secs: 1,
        ..Default::default()
    }
}

const POLL: Duration = Duration::from_millis(10);
const POLL_ATTEMPTS: usize = 300;

async fn wait_for_count(log: &AppendLog, expected: usize) {
    for _ in 0..POLL_ATTEMPTS {
        if log.count().await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("log never reached {expected} records");
}

async fn wait_for_cursor(cursor: &CursorStore, expected: &str) {
    for _ in 0..POLL_ATTEMPTS {
        if cursor.load().await.as_deref() == Some(expected) {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("cursor never reached {expected}");
}

async fn wait_for_subscriber(source: &MockSource) {
    for _ in 0..POLL_ATTEMPTS {
        if source.subscriber_count().await == 1 {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("no live subscription");
}

/// Source whose range queries start failing after a number of calls
struct FlakySource {
    inner: MockSource,
    healthy_fetches: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteSource for FlakySource {
    async fn fetch_after(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RemoteEntry>, SourceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_fetches {
            return Err(SourceError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.inner.fetch_after(start_after, limit).await
    }

    async fn subscribe(&self, start_after: Option<&str>) -> Result<Subscription, SourceError> {
        self.inner.subscribe(start_after).await
    }
}

/// Source that never answers
struct StalledSource;

#[async_trait]
impl RemoteSource for StalledSource {
    async fn fetch_after(
        &self,
        _start_after: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<RemoteEntry>, SourceError> {
        std::future::pending().await
    }

    async fn subscribe(&self, _start_after: Option<&str>) -> Result<Subscription, SourceError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_backfill_700_keys_in_three_batches() {
    let store = Store::new().await;
    let source = Arc::new(MockSource::with_entries(keyspace(1..=700)));

    let report = store.engine(source.clone(), fast_config()).run().await;

    assert_eq!(source.fetch_calls(), 3);
    assert_eq!(report.batches, 3);
    assert_eq!(report.fetched, 700);
    assert_eq!(report.appended, 700);
    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.cursor.as_deref(), Some("k700"));

    assert_eq!(store.cursor.load().await.as_deref(), Some("k700"));
    assert_eq!(store.log.count().await.unwrap(), 700);

    let expected: Vec<String> = (1..=700).map(|i| format!("k{i:03}")).collect();
    assert_eq!(store.ids().await, expected);

    assert_eq!(
        source.fetch_bounds().await,
        vec![None, Some("k300".to_string()), Some("k600".to_string())]
    );
}

#[tokio::test]
async fn test_resume_after_restart() {
    let store = Store::new().await;
    for (key, value) in [("A", reading(1)), ("B", reading(2)), ("C", reading(3))] {
        let record = Record::from_entry(RemoteEntry::new(key, value)).unwrap();
        store.log.append(&record).await.unwrap();
    }
    store.cursor.save("C").await.unwrap();

    let store = store.restart().await;
    let source = Arc::new(MockSource::with_entries([
        ("A", reading(1)),
        ("B", reading(2)),
        ("C", reading(3)),
        ("D", reading(4)),
        ("E", reading(5)),
    ]));
    let replicator = store.replicator(source.clone(), fast_config());

    assert_eq!(replicator.warm().await, 3);
    for id in ["A", "B", "C"] {
        assert!(store.log.dedup().contains(id));
    }

    let report = replicator.backfill().await;
    assert_eq!(source.fetch_bounds().await[0].as_deref(), Some("C"));
    assert_eq!(report.appended, 2);
    assert_eq!(store.ids().await, vec!["A", "B", "C", "D", "E"]);
    assert_eq!(store.cursor.load().await.as_deref(), Some("E"));
}

#[tokio::test]
async fn test_lost_cursor_replays_as_duplicates() {
    let store = Store::new().await;
    let source = Arc::new(MockSource::with_entries(keyspace(1..=5)));
    store.engine(source.clone(), fast_config()).run().await;

    // Cursor file gone, dedup rebuilt from the log
    tokio::fs::remove_file(store.cursor.path()).await.unwrap();
    let store = store.restart().await;
    let replicator = store.replicator(source, fast_config());
    replicator.warm().await;

    let report = replicator.backfill().await;
    assert_eq!(report.appended, 0);
    assert_eq!(report.duplicates, 5);
    assert_eq!(store.log.count().await.unwrap(), 5);
    assert_eq!(store.cursor.load().await.as_deref(), Some("k005"));
}

#[tokio::test]
async fn test_batch_limit_then_continue() {
    let store = Store::new().await;
    let source = Arc::new(MockSource::with_entries(keyspace(1..=50)));
    let config = SyncConfig {
        batch_size: 10,
        max_batches: 2,
        ..fast_config()
    };

    let first = store.engine(source.clone(), config.clone()).run().await;
    assert_eq!(first.stop_reason, StopReason::BatchLimit);
    assert_eq!(first.appended, 20);
    assert_eq!(store.cursor.load().await.as_deref(), Some("k020"));

    let second = store.engine(source.clone(), config).run().await;
    assert_eq!(second.started_after.as_deref(), Some("k020"));
    assert_eq!(second.appended, 20);
    assert_eq!(store.cursor.load().await.as_deref(), Some("k040"));
}

#[tokio::test]
async fn test_fetch_error_keeps_completed_batches() {
    let store = Store::new().await;
    let source = Arc::new(FlakySource {
        inner: MockSource::with_entries(keyspace(1..=30)),
        healthy_fetches: 2,
        calls: AtomicUsize::new(0),
    });
    let config = SyncConfig {
        batch_size: 10,
        ..fast_config()
    };

    let report = store.engine(source, config).run().await;
    assert_eq!(report.stop_reason, StopReason::FetchError);
    assert!(report.is_failure());
    assert_eq!(report.batches, 2);
    assert_eq!(store.cursor.load().await.as_deref(), Some("k020"));
    assert_eq!(store.log.count().await.unwrap(), 20);
}

#[tokio::test]
async fn test_append_error_aborts_run() {
    let dir = TempDir::new().unwrap();
    // The log path is a directory, so every write fails
    let log = Arc::new(
        AppendLog::open(
            AppendLogConfig::with_path(dir.path()),
            RecordSchema::default(),
            Arc::new(DedupIndex::new()),
        )
        .await
        .unwrap(),
    );
    let cursor = Arc::new(CursorStore::new(dir.path().join("last-key.txt")));
    let source = Arc::new(MockSource::with_entries(keyspace(1..=5)));

    let report = BackfillEngine::new(source, log, cursor.clone(), fast_config())
        .run()
        .await;

    assert_eq!(report.stop_reason, StopReason::AppendError);
    assert_eq!(report.appended, 0);
    assert!(report.error.is_some());
    assert!(cursor.load().await.is_none());
}

#[tokio::test]
async fn test_live_tail_follows_backfill() {
    let store = Store::new().await;
    let source = Arc::new(MockSource::with_entries(keyspace(1..=3)));
    let (shutdown_tx, _) = broadcast::channel(1);

    let tasks = store
        .replicator(source.clone(), fast_config())
        .spawn(&shutdown_tx);

    wait_for_count(&store.log, 3).await;
    wait_for_subscriber(&source).await;

    source.insert("k004", reading(4)).await;
    // Invalid live entries are dropped
    source.insert("k005", json!({"fechaHora": "", "sensores": {"t": 1}})).await;
    source.insert("k006", reading(6)).await;

    wait_for_cursor(&store.cursor, "k006").await;
    assert_eq!(store.ids().await, vec!["k001", "k002", "k003", "k004", "k006"]);

    shutdown_tx.send(()).unwrap();
    tasks.join().await;
}

#[tokio::test]
async fn test_tail_resubscribes_from_persisted_cursor() {
    let store = Store::new().await;
    let source = Arc::new(MockSource::with_entries(keyspace(1..=2)));
    let (shutdown_tx, _) = broadcast::channel(1);

    let tasks = store
        .replicator(source.clone(), fast_config())
        .spawn(&shutdown_tx);

    wait_for_subscriber(&source).await;
    source.insert("k003", reading(3)).await;
    wait_for_cursor(&store.cursor, "k003").await;

    // Transport drops; an entry lands while nobody listens
    source.disconnect_all().await;
    source.insert("k004", reading(4)).await;

    wait_for_count(&store.log, 4).await;
    assert!(source.subscribe_bounds().await.contains(&Some("k003".to_string())));

    // A stream error also leads to a fresh subscription
    wait_for_subscriber(&source).await;
    source
        .fail_subscriptions(|| SourceError::Cancelled("permission denied".into()))
        .await;
    source.insert("k005", reading(5)).await;

    wait_for_cursor(&store.cursor, "k005").await;
    assert_eq!(store.ids().await, vec!["k001", "k002", "k003", "k004", "k005"]);

    shutdown_tx.send(()).unwrap();
    tasks.join().await;
}

#[tokio::test]
async fn test_tail_retries_failed_subscribe() {
    let store = Store::new().await;
    let source = Arc::new(MockSource::with_entries(keyspace(1..=1)));
    source.fail_next_subscribes(2);
    let (shutdown_tx, _) = broadcast::channel(1);

    let tasks = store
        .replicator(source.clone(), fast_config())
        .spawn(&shutdown_tx);

    wait_for_subscriber(&source).await;
    assert_eq!(source.subscribe_bounds().await.len(), 3);

    shutdown_tx.send(()).unwrap();
    tasks.join().await;
}

#[tokio::test]
async fn test_shutdown_interrupts_backfill() {
    let store = Store::new().await;
    let (shutdown_tx, _) = broadcast::channel(1);

    let tasks = store
        .replicator(Arc::new(StalledSource), fast_config())
        .spawn(&shutdown_tx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), tasks.join())
        .await
        .expect("replication kept waiting on a stalled fetch");
    assert!(store.cursor.load().await.is_none());
}
