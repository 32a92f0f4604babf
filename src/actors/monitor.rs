//! ThresholdMonitorActor - Periodically compares an aggregate with a threshold
//!
//! One actor runs per (metric, trigger). Every interval it asks its
//! [`Aggregator`] for the value of the trailing window and hands a breach to
//! its [`Notifier`].
//!
//! ## Lifecycle
//!
//! ```text
//! Running ──(shared cancellation)──────────────────────────► Stopped
//!    │
//!    └──(Stop command)──► Stopping ──(ack on oneshot)──────► Stopped
//! ```
//!
//! Whatever the exit path, the actor drops its clone of the owner's done
//! sender, so the owner observes a closed channel once all of its monitors
//! have exited.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace};

use crate::aggregator::Aggregator;
use crate::notifier::Notifier;

use super::messages::MonitorCommand;

/// What a threshold monitor watches
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSettings {
    pub metric: String,
    pub threshold: f32,
    /// Poll interval, also the aggregation window
    pub interval: Duration,
    pub environment: String,
}

/// Why a monitor left its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Cancelled,
    Stopped,
}

pub struct ThresholdMonitorActor {
    settings: ThresholdSettings,

    aggregator: Arc<dyn Aggregator>,

    notifier: Box<dyn Notifier>,

    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Shared cancellation signal, `true` means stop
    cancel: watch::Receiver<bool>,

    /// Released when the actor exits
    done: mpsc::Sender<()>,
}

impl ThresholdMonitorActor {
    pub fn new(
        settings: ThresholdSettings,
        aggregator: Arc<dyn Aggregator>,
        notifier: Box<dyn Notifier>,
        command_rx: mpsc::Receiver<MonitorCommand>,
        cancel: watch::Receiver<bool>,
        done: mpsc::Sender<()>,
    ) -> Self {
        Self {
            settings,
            aggregator,
            notifier,
            command_rx,
            cancel,
            done,
        }
    }

    #[instrument(skip(self), fields(metric = %self.settings.metric, threshold = self.settings.threshold))]
    pub async fn run(mut self) -> MonitorExit {
        debug!("starting threshold monitor");

        let exit = self.watch().await;

        match exit {
            MonitorExit::Cancelled => info!("quitting on cancellation"),
            MonitorExit::Stopped => info!("closing on stop request"),
        }

        drop(self.done);
        exit
    }

    async fn watch(&mut self) -> MonitorExit {
        if *self.cancel.borrow_and_update() {
            return MonitorExit::Cancelled;
        }

        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow_and_update() {
                        return MonitorExit::Cancelled;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MonitorCommand::Stop { respond_to } => {
                            let _ = respond_to.send(());
                            return MonitorExit::Stopped;
                        }
                    }
                }

                _ = ticker.tick() => self.evaluate().await,
            }
        }
    }

    async fn evaluate(&mut self) {
        let ThresholdSettings {
            metric,
            threshold,
            interval,
            environment,
        } = &self.settings;

        let count = self.aggregator.collect(metric, *interval).await;
        trace!("{metric} = {count}");

        // NaN is never a breach
        if count.is_nan() || count < *threshold {
            return;
        }

        let text = format!(
            "{metric} has exceeded threshold by {:.3} in {environment}",
            count - threshold
        );
        let values = HashMap::from([("count".to_string(), text)]);

        if let Err(e) = self.notifier.send(&values).await {
            error!("failed to notify: {e}");
        }
    }
}

/// Handle for stopping a ThresholdMonitorActor
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,

    pub metric: String,

    pub threshold: f32,
}

impl MonitorHandle {
    /// Spawn a monitor actor
    ///
    /// `done` is held until the actor exits.
    pub fn spawn(
        settings: ThresholdSettings,
        aggregator: Arc<dyn Aggregator>,
        notifier: Box<dyn Notifier>,
        cancel: watch::Receiver<bool>,
        done: mpsc::Sender<()>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);

        let metric = settings.metric.clone();
        let threshold = settings.threshold;

        let actor =
            ThresholdMonitorActor::new(settings, aggregator, notifier, cmd_rx, cancel, done);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            metric,
            threshold,
        }
    }

    /// Stop the monitor and wait until it has left its loop
    ///
    /// Returns `false` if the monitor had already exited.
    pub async fn stop(&self) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(MonitorCommand::Stop { respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.is_ok()
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
