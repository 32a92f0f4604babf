//! JSON-RPC over the Unix socket

use std::time::Duration;

use futures::future::join_all;
use tally::rpc::{Instrument, RpcClient, STATUS_OK};
use tally::storage::index_key;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::helpers::{TestServer, memory_store};

#[tokio::test]
async fn test_concurrent_clients() {
    let (backend, store) = memory_store();
    let server = TestServer::start(store);

    let clients = (0..4).map(|_| {
        let socket = server.socket.clone();
        async move {
            let mut client = RpcClient::connect(&socket).await.unwrap();
            for _ in 0..25 {
                assert_eq!(client.call_metric("jobs.failed:1|c").await.unwrap(), STATUS_OK);
            }
        }
    });
    join_all(clients).await;

    let stats = server.collector.flush().await.unwrap();
    assert_eq!(stats.written, 100);
    assert_eq!(backend.hash_len("jobs.failed"), 100);
    assert_eq!(backend.sorted_set_len(&index_key("jobs.failed")), 100);

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_datagram_is_refused() {
    let (backend, store) = memory_store();
    let server = TestServer::start(store);

    let mut client = RpcClient::connect(&server.socket).await.unwrap();
    let err = client.call_metric("no-separator").await.unwrap_err();
    assert!(err.to_string().contains("failed to process metrics"));

    // The connection stays usable after a refused metric
    assert_eq!(client.call_metric("ok:1|c").await.unwrap(), STATUS_OK);

    server.collector.flush().await.unwrap();
    assert_eq!(backend.hash_len("no-separator"), 0);
    assert_eq!(backend.hash_len("ok"), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_non_finite_values_never_reach_the_window() {
    let (backend, store) = memory_store();
    let server = TestServer::start(store.clone());

    let mut client = RpcClient::connect(&server.socket).await.unwrap();
    for datagram in ["errors:NaN|c", "errors:inf|c", "errors:1e40|c"] {
        let err = client.call_metric(datagram).await.unwrap_err();
        assert!(err.to_string().contains("failed to process metrics"));
    }
    assert_eq!(client.call_metric("errors:2|c").await.unwrap(), STATUS_OK);

    server.collector.flush().await.unwrap();
    assert_eq!(backend.hash_len("errors"), 1);
    assert_eq!(store.sum_range("errors", Duration::from_secs(60)).await, 2.0);

    server.stop().await;
}

#[tokio::test]
async fn test_raw_protocol_lines() {
    let (_backend, store) = memory_store();
    let server = TestServer::start(store);

    let stream = UnixStream::connect(&server.socket).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write
        .write_all(b"{\"method\":\"Metric.Handle\",\"params\":[{\"Text\":\"a:1|c\"}],\"id\":7}\n")
        .await
        .unwrap();
    let reply: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply, serde_json::json!({"id": 7, "result": 0, "error": null}));

    write
        .write_all(b"{\"method\":\"Metric.Drop\",\"params\":[],\"id\":8}\n")
        .await
        .unwrap();
    let reply: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["id"], 8);
    assert_eq!(reply["error"], "rpc: can't find method Metric.Drop");

    server.stop().await;
}

#[tokio::test]
async fn test_instrument_counts_up_and_down() {
    let (_backend, store) = memory_store();
    let server = TestServer::start(store.clone());

    let instrument = Instrument::connect(&server.socket).await;
    assert!(instrument.is_enabled());

    instrument.incr("sessions").await;
    instrument.incr("sessions").await;
    instrument.decr("sessions").await;
    server.collector.flush().await.unwrap();

    let total = store.sum_range("sessions", Duration::from_secs(60)).await;
    assert_eq!(total, 1.0);

    server.stop().await;
}

#[tokio::test]
async fn test_socket_is_removed_on_shutdown() {
    let (_backend, store) = memory_store();
    let server = TestServer::start(store);
    let socket = server.socket.clone();
    assert!(socket.exists());

    server.stop().await;
    assert!(!socket.exists());
}
