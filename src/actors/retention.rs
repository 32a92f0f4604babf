//! RetentionActor - Evicts observations that fell out of every window
//!
//! Monitors only ever read the trailing `interval` of a metric, so anything
//! older than the retention period can go. The retention period is never
//! shorter than the longest monitor interval.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::storage::WindowStore;
use crate::util::now_micros;

use super::messages::RetentionCommand;

/// Default period between two eviction passes
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct RetentionActor {
    store: WindowStore,

    /// Counter metrics to clean up
    metrics: Vec<String>,

    retention: Duration,

    cleanup_interval: Duration,

    command_rx: mpsc::Receiver<RetentionCommand>,
}

impl RetentionActor {
    pub fn new(
        store: WindowStore,
        metrics: Vec<String>,
        retention: Duration,
        cleanup_interval: Duration,
        command_rx: mpsc::Receiver<RetentionCommand>,
    ) -> Self {
        Self {
            store,
            metrics,
            retention,
            cleanup_interval,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(metrics = self.metrics.len(), retention = ?self.retention))]
    pub async fn run(mut self) {
        debug!("starting retention actor");

        self.run_cleanup().await;

        let mut cleanup = interval_at(
            Instant::now() + self.cleanup_interval,
            self.cleanup_interval,
        );

        loop {
            tokio::select! {
                _ = cleanup.tick() => {
                    self.run_cleanup().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(RetentionCommand::RunNow { respond_to }) => {
                            let evicted = self.run_cleanup().await;
                            let _ = respond_to.send(evicted);
                        }

                        Some(RetentionCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("retention actor stopped");
    }

    async fn run_cleanup(&mut self) -> usize {
        let cutoff = now_micros() - self.retention.as_micros() as i64;
        let mut evicted = 0;

        for metric in &self.metrics {
            match self.store.evict_before(metric, cutoff).await {
                Ok(count) => evicted += count,
                Err(e) => error!("failed to evict old observations of {metric}: {e}"),
            }
        }

        if evicted > 0 {
            info!("retention cleanup complete: evicted {evicted} observations");
        } else {
            trace!("retention cleanup: nothing to evict");
        }

        evicted
    }
}

/// Handle for controlling the RetentionActor
#[derive(Clone)]
pub struct RetentionHandle {
    sender: mpsc::Sender<RetentionCommand>,
}

impl RetentionHandle {
    /// Spawn the retention actor
    ///
    /// `retention` is raised to `min_retention` (the longest monitor interval)
    /// if it is shorter.
    pub fn spawn(
        store: WindowStore,
        metrics: Vec<String>,
        retention: Duration,
        min_retention: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let retention = if retention < min_retention {
            warn!("retention {retention:?} is shorter than a monitor window, using {min_retention:?}");
            min_retention
        } else {
            retention
        };

        let actor = RetentionActor::new(store, metrics, retention, cleanup_interval, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run an eviction pass now
    pub async fn run_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RetentionCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RetentionCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
