//! IngestCollectorActor - Batches decoded metrics into the window store
//!
//! One collector exists per process. It is constructed once at startup and
//! every producer gets a clone of its [`CollectorHandle`].
//!
//! ## Message Flow
//!
//! ```text
//! handle.send(metric) ──► bounded queue (1000) ──► batch ──► flush ──► WindowStore::append (one task per metric)
//!                                                    ▲
//!                          size ≥ 300 or 200ms tick ─┘
//! ```
//!
//! A full queue makes `send` wait up to 100ms. If the queue is still full the
//! metric is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::protocol::Metric;
use crate::storage::WindowStore;
use crate::util::now_micros;

use super::messages::{CollectorCommand, CollectorStats};

/// Capacity of the metric queue
pub const QUEUE_CAPACITY: usize = 1000;

/// Pending metrics that force an immediate flush
pub const BATCH_SIZE_TRIGGER: usize = 300;

/// Period of the time-based flush
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// How long `send` waits for room in a full queue
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Size,
    Tick,
    Requested,
    Final,
}

/// Actor owning the pending batch
pub struct IngestCollectorActor {
    store: WindowStore,

    metric_rx: mpsc::Receiver<Metric>,

    command_rx: mpsc::Receiver<CollectorCommand>,

    batch: Vec<Metric>,

    stats: CollectorStats,

    /// Shared with the handles, which do the dropping
    dropped: Arc<AtomicU64>,

    /// Last timestamp handed to a write
    last_timestamp: i64,
}

impl IngestCollectorActor {
    pub fn new(
        store: WindowStore,
        metric_rx: mpsc::Receiver<Metric>,
        command_rx: mpsc::Receiver<CollectorCommand>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            store,
            metric_rx,
            command_rx,
            batch: Vec::with_capacity(BATCH_SIZE_TRIGGER),
            stats: CollectorStats::default(),
            dropped,
            last_timestamp: 0,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until the metric queue is closed or a Shutdown command arrives.
    /// Pending metrics are flushed before returning.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting ingestion collector");

        let mut ticker = interval_at(Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        self.flush(FlushReason::Tick).await;
                    }
                }

                metric = self.metric_rx.recv() => {
                    let Some(metric) = metric else {
                        debug!("metric queue closed");
                        self.flush(FlushReason::Final).await;
                        break;
                    };

                    self.batch.push(metric);
                    if self.batch.len() >= BATCH_SIZE_TRIGGER {
                        self.flush(FlushReason::Size).await;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CollectorCommand::Flush { respond_to } => {
                            self.flush(FlushReason::Requested).await;
                            let _ = respond_to.send(self.snapshot());
                        }

                        CollectorCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.snapshot());
                        }

                        CollectorCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            self.flush(FlushReason::Final).await;
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            written = self.stats.written,
            failed = self.stats.failed,
            "ingestion collector stopped"
        );
    }

    fn snapshot(&self) -> CollectorStats {
        CollectorStats {
            pending: self.batch.len(),
            dropped: self.dropped.load(Ordering::Relaxed),
            ..self.stats
        }
    }

    /// Strictly increasing microsecond timestamps so one batch never
    /// overwrites its own observations
    fn next_timestamp(&mut self) -> i64 {
        let ts = now_micros().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    /// Write the pending batch, one task per counter, and wait for all of them
    #[instrument(skip(self), fields(size = self.batch.len()))]
    async fn flush(&mut self, reason: FlushReason) {
        if self.batch.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.batch);
        let mut writes = JoinSet::new();

        for metric in batch {
            if !metric.is_counter() {
                trace!("ignoring {} metric {}", metric.kind, metric.name);
                self.stats.ignored += 1;
                continue;
            }

            let ts = self.next_timestamp();
            let store = self.store.clone();
            writes.spawn(async move {
                store
                    .append(&metric.name, ts, metric.value)
                    .await
                    .map_err(|e| (metric.name, e))
            });
        }

        while let Some(result) = writes.join_next().await {
            match result {
                Ok(Ok(())) => self.stats.written += 1,
                Ok(Err((name, e))) => {
                    error!("failed to store observation of {name}: {e}");
                    self.stats.failed += 1;
                }
                Err(e) => {
                    error!("write task failed: {e}");
                    self.stats.failed += 1;
                }
            }
        }

        self.stats.flush_count += 1;
        match reason {
            FlushReason::Size => self.stats.size_flushes += 1,
            FlushReason::Tick => self.stats.tick_flushes += 1,
            FlushReason::Requested | FlushReason::Final => {}
        }

        trace!("flush ({reason:?}) complete");
    }
}

/// Handle for feeding and controlling the IngestCollectorActor
///
/// Cheap to clone; every producer in the process shares the same actor.
#[derive(Clone)]
pub struct CollectorHandle {
    metric_tx: mpsc::Sender<Metric>,

    sender: mpsc::Sender<CollectorCommand>,

    dropped: Arc<AtomicU64>,
}

impl CollectorHandle {
    /// Spawn the collector actor writing into `store`
    pub fn spawn(store: WindowStore) -> Self {
        let (metric_tx, metric_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let dropped = Arc::new(AtomicU64::new(0));

        let actor = IngestCollectorActor::new(store, metric_rx, cmd_rx, dropped.clone());
        tokio::spawn(actor.run());

        Self {
            metric_tx,
            sender: cmd_tx,
            dropped,
        }
    }

    /// Enqueue a metric, waiting at most [`ENQUEUE_TIMEOUT`] for room
    ///
    /// Returns `false` when the metric was dropped.
    pub async fn send(&self, metric: Metric) -> bool {
        let metric = match self.metric_tx.try_send(metric) {
            Ok(()) => return true,
            Err(TrySendError::Full(metric)) => metric,
            Err(TrySendError::Closed(metric)) => {
                warn!("collector stopped, dropping {metric}");
                return false;
            }
        };

        match self.metric_tx.send_timeout(metric, ENQUEUE_TIMEOUT).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(metric)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("metric queue full, dropping {metric}");
                false
            }
            Err(SendTimeoutError::Closed(metric)) => {
                warn!("collector stopped, dropping {metric}");
                false
            }
        }
    }

    /// Current collector statistics
    pub async fn stats(&self) -> Result<CollectorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Flush everything queued before this call
    pub async fn flush(&self) -> Result<CollectorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive response")
    }

    /// Flush pending metrics and stop the collector
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")
    }

    /// Metrics dropped so far because the queue stayed full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
