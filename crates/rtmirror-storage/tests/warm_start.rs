//! Warm-start tests for rtmirror-storage
//!
//! These tests verify that a fresh process rebuilds its dedup state from
//! the tail of an existing log and its cursor from the cursor file.

use std::sync::Arc;

use rtmirror_core::{Record, RecordSchema, RemoteEntry};
use rtmirror_storage::{AppendLog, AppendLogConfig, AppendOutcome, CursorStore, DedupIndex};
use serde_json::json;
use tempfile::TempDir;

fn record(id: &str) -> Record {
    Record::from_entry(RemoteEntry::new(
        id,
        json!({"fechaHora": "2024-03-01 12:00:00", "sensores": {"hum": 40, "temp": 22.1}}),
    ))
    .unwrap()
}

async fn open_log(temp: &TempDir, dedup: Arc<DedupIndex>) -> AppendLog {
    AppendLog::open(
        AppendLogConfig::with_path(temp.path().join("cache.jsonl")),
        RecordSchema::default(),
        dedup,
    )
    .await
    .unwrap()
}

/// A restarted process treats everything already in the log tail as seen
#[tokio::test]
async fn test_resumed_process_treats_logged_ids_as_duplicates() {
    let temp = TempDir::new().unwrap();
    let cursor = CursorStore::new(temp.path().join("last-key.txt"));

    // First run
    {
        let log = open_log(&temp, Arc::new(DedupIndex::new())).await;
        for id in ["A", "B", "C"] {
            log.append(&record(id)).await.unwrap();
        }
        cursor.save("C").await.unwrap();
    }

    // Second run
    let dedup = Arc::new(DedupIndex::new());
    let log = open_log(&temp, dedup.clone()).await;
    let loaded = dedup.warm_from_tail(&log, 2000, 200 * 1024).await.unwrap();
    assert_eq!(loaded, 3);

    for id in ["A", "B", "C"] {
        assert!(dedup.contains(id));
        assert_eq!(log.append(&record(id)).await.unwrap(), AppendOutcome::Duplicate);
    }
    assert_eq!(log.count().await.unwrap(), 3);
    assert_eq!(cursor.load().await.as_deref(), Some("C"));
}

/// Warm start keeps only the newest `max_count` ids
#[tokio::test]
async fn test_warm_start_is_bounded_by_count() {
    let temp = TempDir::new().unwrap();
    {
        let log = open_log(&temp, Arc::new(DedupIndex::new())).await;
        for i in 0..50 {
            log.append(&record(&format!("id{i:02}"))).await.unwrap();
        }
    }

    let dedup = Arc::new(DedupIndex::new());
    let log = open_log(&temp, dedup.clone()).await;
    let loaded = dedup.warm_from_tail(&log, 10, 200 * 1024).await.unwrap();

    assert_eq!(loaded, 10);
    assert_eq!(dedup.len(), 10);
    assert!(dedup.contains("id49"));
    assert!(dedup.contains("id40"));
    assert!(!dedup.contains("id39"));
}

/// Warm start never reads past its byte window
#[tokio::test]
async fn test_warm_start_is_bounded_by_window() {
    let temp = TempDir::new().unwrap();
    {
        let log = open_log(&temp, Arc::new(DedupIndex::new())).await;
        for i in 0..100 {
            log.append(&record(&format!("id{i:03}"))).await.unwrap();
        }
    }

    let dedup = Arc::new(DedupIndex::new());
    let log = open_log(&temp, dedup.clone()).await;
    let line_len = record("id000").to_line().unwrap().len() as u64 + 1;
    let loaded = dedup.warm_from_tail(&log, 2000, line_len * 5).await.unwrap();

    assert_eq!(loaded, 5);
    assert!(dedup.contains("id099"));
    assert!(!dedup.contains("id094"));
}

/// Warm start on a fresh install is a no-op
#[tokio::test]
async fn test_warm_start_without_log() {
    let temp = TempDir::new().unwrap();
    let dedup = Arc::new(DedupIndex::new());
    let log = open_log(&temp, dedup.clone()).await;

    assert_eq!(dedup.warm_from_tail(&log, 2000, 200 * 1024).await.unwrap(), 0);
    assert!(dedup.is_empty());
}
