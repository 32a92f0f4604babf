//! Sliding-window storage on SQLite

use std::sync::Arc;
use std::time::Duration;

use tally::storage::sqlite::SqliteBackend;
use tally::storage::{KvBackend, WindowStore};
use tally::util::now_micros;

const MINUTE: i64 = 60 * 1_000_000;

async fn open(path: &std::path::Path) -> (Arc<SqliteBackend>, WindowStore) {
    let backend = Arc::new(SqliteBackend::new(path).await.unwrap());
    (backend.clone(), WindowStore::new(backend))
}

#[tokio::test]
async fn test_window_sums_recent_values() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, store) = open(&dir.path().join("tally.db")).await;
    let now = now_micros();

    store.append("errors", now - 30 * MINUTE, 5.0).await.unwrap();
    store.append("errors", now - 10 * MINUTE, 7.0).await.unwrap();
    store.append("errors", now - 120 * MINUTE, 100.0).await.unwrap();

    let total = store
        .sum_range_at("errors", Duration::from_secs(3600), now)
        .await;
    assert_eq!(total, 12.0);
}

#[tokio::test]
async fn test_eviction_drops_index_and_values() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, store) = open(&dir.path().join("tally.db")).await;
    let now = now_micros();

    store.append("errors", now - 120 * MINUTE, 1.0).await.unwrap();
    store.append("errors", now - 90 * MINUTE, 1.0).await.unwrap();
    store.append("errors", now - MINUTE, 1.0).await.unwrap();

    let evicted = store.evict_before("errors", now - 60 * MINUTE).await.unwrap();
    assert_eq!(evicted, 2);

    let old_field = (now - 120 * MINUTE).to_string();
    assert_eq!(backend.hget("errors", &old_field).await.unwrap(), None);
    assert_eq!(
        store.sum_range_at("errors", Duration::from_secs(86_400), now).await,
        1.0
    );
}

#[tokio::test]
async fn test_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    let now = now_micros();

    {
        let (backend, store) = open(&path).await;
        store.append("errors", now - MINUTE, 2.5).await.unwrap();
        store.append("errors", now - 2 * MINUTE, 1.5).await.unwrap();
        backend.close().await.unwrap();
    }

    let (backend, store) = open(&path).await;
    assert_eq!(
        store.sum_range_at("errors", Duration::from_secs(3600), now).await,
        4.0
    );
    assert_eq!(
        backend.hget("errors", &(now - MINUTE).to_string()).await.unwrap(),
        Some("2.500".to_string())
    );
}
