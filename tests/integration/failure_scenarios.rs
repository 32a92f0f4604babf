//! Degraded storage and delivery

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tally::Metric;
use tally::actors::collector::CollectorHandle;
use tally::aggregator::{Aggregator, CountAggregator};
use tally::agent::MonitoringAgent;
use tally::config::parse_monitor_config;
use tally::notifier::{MailMessage, Mailer, NotifierContext, NotifyError};
use tally::storage::{HealthStatus, KvBackend, ScoreRange, StorageError, StorageResult, WindowStore};
use tokio::sync::watch;

use crate::helpers::{MONITOR_CONFIG, RecordingMailer};

/// Every operation fails as if the database were gone
struct UnavailableBackend;

fn unavailable() -> StorageError {
    StorageError::BackendError("database is locked".to_string())
}

#[async_trait]
impl KvBackend for UnavailableBackend {
    async fn hset(&self, _: &str, _: &str, _: &str) -> StorageResult<()> {
        Err(unavailable())
    }
    async fn hget(&self, _: &str, _: &str) -> StorageResult<Option<String>> {
        Err(unavailable())
    }
    async fn hdel(&self, _: &str, _: &[String]) -> StorageResult<usize> {
        Err(unavailable())
    }
    async fn zadd(&self, _: &str, _: &str, _: f64) -> StorageResult<()> {
        Err(unavailable())
    }
    async fn zrange_by_score(&self, _: &str, _: ScoreRange) -> StorageResult<Vec<(String, f64)>> {
        Err(unavailable())
    }
    async fn zrem_range_by_score(&self, _: &str, _: ScoreRange) -> StorageResult<usize> {
        Err(unavailable())
    }
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Err(unavailable())
    }
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

struct RejectingMailer;

#[async_trait]
impl Mailer for RejectingMailer {
    async fn send(&self, _: MailMessage) -> Result<(), NotifyError> {
        Err(NotifyError::Rejected(503))
    }
}

fn context() -> NotifierContext {
    NotifierContext {
        service_name: "billing".to_string(),
        environment: "test".to_string(),
    }
}

#[tokio::test]
async fn test_unavailable_storage_counts_zero() {
    let aggregator = CountAggregator::new(WindowStore::new(Arc::new(UnavailableBackend)));

    assert_eq!(
        aggregator.collect("http.response.500", Duration::from_secs(60)).await,
        0.0
    );
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_storage_never_alerts() {
    let store = WindowStore::new(Arc::new(UnavailableBackend));
    let mailer = Arc::new(RecordingMailer::default());
    let (cancel, cancel_rx) = watch::channel(false);
    let agent = MonitoringAgent::new(
        Arc::new(CountAggregator::new(store)),
        mailer.clone(),
        context(),
        cancel_rx,
    );

    let running = agent.start(&parse_monitor_config(MONITOR_CONFIG, "billing").unwrap());
    tokio::time::sleep(Duration::from_secs(5)).await;

    cancel.send(true).unwrap();
    running.wait().await;
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn test_collector_survives_failed_writes() {
    let collector = CollectorHandle::spawn(WindowStore::new(Arc::new(UnavailableBackend)));

    for _ in 0..10 {
        assert!(collector.send(Metric::counter("errors", 1.0)).await);
    }
    let stats = collector.flush().await.unwrap();
    assert_eq!(stats.failed, 10);
    assert_eq!(stats.written, 0);
    assert_eq!(stats.pending, 0);

    assert!(collector.send(Metric::counter("errors", 1.0)).await);
    let stats = collector.flush().await.unwrap();
    assert_eq!(stats.failed, 11);

    collector.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_monitor_keeps_running_when_delivery_fails() {
    let (cancel, cancel_rx) = watch::channel(false);
    let agent = MonitoringAgent::new(
        Arc::new(BreachingAggregator),
        Arc::new(RejectingMailer),
        context(),
        cancel_rx,
    );

    let running = agent.start(&parse_monitor_config(MONITOR_CONFIG, "billing").unwrap());
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(running.handles().iter().all(|handle| handle.is_running()));
    assert_eq!(running.pending(), 1);

    cancel.send(true).unwrap();
    assert_eq!(running.wait().await.len(), 1);
}

struct BreachingAggregator;

#[async_trait]
impl Aggregator for BreachingAggregator {
    async fn collect(&self, _: &str, _: Duration) -> f32 {
        5000.0
    }
}
