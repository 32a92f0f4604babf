use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::actors::collector::CollectorHandle;
use crate::protocol::parse_datagram;

use super::{METHOD_HANDLE, RpcRequest, RpcResponse};

/// Accepts metric datagrams over a Unix socket and feeds the collector
pub struct MetricServer {
    listener: UnixListener,
    path: PathBuf,
    collector: CollectorHandle,
}

impl MetricServer {
    /// Bind `path`, replacing a stale socket file left by a previous run
    pub fn bind(path: impl AsRef<Path>, collector: CollectorHandle) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        remove_socket_file(&path);

        let listener = UnixListener::bind(&path)?;
        info!("listening on {}", path.display());

        Ok(Self {
            listener,
            path,
            collector,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serve connections until `shutdown` turns `true`, then remove the socket file
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            listener,
            path,
            collector,
        } = self;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("closing listener");
                        break;
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            trace!("accepted connection");
                            tokio::spawn(serve_connection(stream, collector.clone()));
                        }
                        Err(e) => {
                            error!("failed to accept connection: {e}");
                            break;
                        }
                    }
                }
            }
        }

        drop(listener);
        remove_socket_file(&path);
        Ok(())
    }
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed socket file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove socket file {}: {e}", path.display()),
    }
}

async fn serve_connection(stream: UnixStream, collector: CollectorHandle) {
    if let Err(e) = handle_connection(stream, &collector).await {
        debug!("connection closed with error: {e}");
    }
}

async fn handle_connection(stream: UnixStream, collector: &CollectorHandle) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_request(&line, collector).await;

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        write.write_all(&out).await?;
    }

    Ok(())
}

/// Answer a single request line
pub async fn handle_request(line: &str, collector: &CollectorHandle) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("invalid request: {e}");
            return RpcResponse::error(serde_json::Value::Null, format!("invalid request: {e}"));
        }
    };

    if request.method != METHOD_HANDLE {
        return RpcResponse::error(
            request.id,
            format!("rpc: can't find method {}", request.method),
        );
    }

    let Some(args) = request.params.first() else {
        return RpcResponse::failed(request.id, "missing metric");
    };

    match parse_datagram(&args.text) {
        Ok(metric) => {
            if collector.send(metric).await {
                RpcResponse::ok(request.id)
            } else {
                RpcResponse::failed(request.id, "metric dropped")
            }
        }
        Err(e) => {
            warn!("invalid metric {:?}: {e}", args.text);
            RpcResponse::failed(request.id, "failed to process metrics")
        }
    }
}
