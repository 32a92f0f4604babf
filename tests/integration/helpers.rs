//! Helper functions for integration tests

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tally::actors::collector::CollectorHandle;
use tally::notifier::{MailMessage, Mailer, NotifyError};
use tally::rpc::MetricServer;
use tally::storage::WindowStore;
use tally::storage::memory::MemoryBackend;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn memory_store() -> (Arc<MemoryBackend>, WindowStore) {
    let backend = Arc::new(MemoryBackend::new());
    (backend.clone(), WindowStore::new(backend))
}

/// A metric server on a socket inside a fresh temp dir
pub struct TestServer {
    // Keeps the socket directory alive
    _dir: TempDir,
    pub socket: PathBuf,
    pub collector: CollectorHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub fn start(store: WindowStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("tally.sock");
        let collector = CollectorHandle::spawn(store);

        let server = MetricServer::bind(&socket, collector.clone()).unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(server.run(shutdown_rx));

        Self {
            _dir: dir,
            socket,
            collector,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.task.await.unwrap().unwrap();
        self.collector.shutdown().await.unwrap();
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: MailMessage) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub const MONITOR_CONFIG: &str = r#"
version: 1
monitors:
  - metric: http.response.500
    type: c
    interval: 1
    triggers:
      - threshold: 10
        text: "{{count}}"
        to: [ops@example.com, ops@example.com]
        run_every: 10
      - threshold: 1000
        to: [oncall@example.com]
  - metric: queue.depth
    type: g
    triggers:
      - threshold: 1
        to: [ops@example.com]
"#;
