use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{trace, warn};

use super::{METHOD_HANDLE, MetricArgs, RpcRequest, RpcResponse};

/// Client for a [`MetricServer`](super::MetricServer)
pub struct RpcClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl RpcClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("failed to connect to {}", path.display()))?;

        let (read, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read).lines(),
            writer,
            next_id: 0,
        })
    }

    /// Submit one datagram and return the server's status
    pub async fn call_metric(&mut self, text: &str) -> Result<i32> {
        self.next_id += 1;
        let id = self.next_id;

        let request = RpcRequest {
            method: METHOD_HANDLE.to_string(),
            params: vec![MetricArgs {
                text: text.to_string(),
            }],
            id: id.into(),
        };

        let mut out = serde_json::to_vec(&request)?;
        out.push(b'\n');
        self.writer
            .write_all(&out)
            .await
            .context("failed to send request")?;

        let line = self
            .reader
            .next_line()
            .await
            .context("failed to read response")?
            .ok_or_else(|| anyhow!("server closed the connection"))?;

        let response: RpcResponse =
            serde_json::from_str(&line).context("failed to parse response")?;
        trace!("response: {response:?}");

        if response.id != serde_json::Value::from(id) {
            bail!("response id {} does not match request id {id}", response.id);
        }

        if let Some(error) = response.error {
            bail!(error);
        }

        response.result.ok_or_else(|| anyhow!("response without result"))
    }
}

/// Fire-and-forget counter instrumentation for application code
///
/// When the server cannot be reached every call is a no-op.
pub struct Instrument {
    client: Option<Mutex<RpcClient>>,
}

impl Instrument {
    pub async fn connect(path: impl AsRef<Path>) -> Self {
        match RpcClient::connect(path).await {
            Ok(client) => Self {
                client: Some(Mutex::new(client)),
            },
            Err(e) => {
                warn!("failed to connect to socket, instrumentation disabled: {e:#}");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Submit `<metric>:<dir>|c`
    pub async fn count(&self, metric: &str, dir: i32) {
        let Some(client) = &self.client else {
            return;
        };

        let datagram = format!("{metric}:{dir}|c");
        trace!("{datagram}");

        if let Err(e) = client.lock().await.call_metric(&datagram).await {
            warn!("failed to submit {datagram}: {e:#}");
        }
    }

    pub async fn incr(&self, metric: &str) {
        self.count(metric, 1).await;
    }

    pub async fn decr(&self, metric: &str) {
        self.count(metric, -1).await;
    }
}
