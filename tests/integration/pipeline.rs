//! End-to-end: datagrams over the socket, windowed count, alert mail

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tally::aggregator::CountAggregator;
use tally::agent::{MONITORING_STOPPED, MonitoringAgent};
use tally::config::parse_monitor_config;
use tally::notifier::NotifierContext;
use tally::rpc::RpcClient;
use tokio::sync::watch;

use crate::helpers::{MONITOR_CONFIG, RecordingMailer, TestServer, memory_store};

fn context() -> NotifierContext {
    NotifierContext {
        service_name: "billing".to_string(),
        environment: "test".to_string(),
    }
}

#[tokio::test]
async fn test_breach_is_reported_once() {
    let (backend, store) = memory_store();
    let server = TestServer::start(store.clone());

    let monitors = parse_monitor_config(MONITOR_CONFIG, "billing").unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let (cancel, cancel_rx) = watch::channel(false);
    let agent = MonitoringAgent::new(
        Arc::new(CountAggregator::new(store)),
        mailer.clone(),
        context(),
        cancel_rx,
    );
    let running = agent.start(&monitors);
    assert_eq!(running.handles().len(), 2);

    let mut client = RpcClient::connect(&server.socket).await.unwrap();
    for _ in 0..12 {
        assert_eq!(client.call_metric("http.response.500:1|c").await.unwrap(), 0);
    }
    let stats = server.collector.flush().await.unwrap();
    assert_eq!(stats.written, 12);
    assert_eq!(backend.hash_len("http.response.500"), 12);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    cancel.send(true).unwrap();
    let stopped = running.wait().await;
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].reason, MONITORING_STOPPED);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].subject,
        "http.response.500 error limit exceeded in billing"
    );
    assert_eq!(sent[0].recipients, vec!["ops@example.com".to_string()]);
    assert_eq!(
        sent[0].body,
        "billing\nSLA breached in test\nhttp.response.500 has exceeded threshold by 2.000 in test\n"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_count_below_threshold_stays_quiet() {
    let (_backend, store) = memory_store();
    let server = TestServer::start(store.clone());

    let monitors = parse_monitor_config(MONITOR_CONFIG, "billing").unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let (cancel, cancel_rx) = watch::channel(false);
    let agent = MonitoringAgent::new(
        Arc::new(CountAggregator::new(store)),
        mailer.clone(),
        context(),
        cancel_rx,
    );
    let running = agent.start(&monitors);

    let mut client = RpcClient::connect(&server.socket).await.unwrap();
    for _ in 0..5 {
        client.call_metric("http.response.500:1|c").await.unwrap();
    }
    // Gauges are accepted but never counted
    client.call_metric("http.response.500:50|g").await.unwrap();
    server.collector.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.send(true).unwrap();
    running.wait().await;

    assert!(mailer.sent().is_empty());
    server.stop().await;
}
