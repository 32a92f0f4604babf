//! Monitoring agent: turns monitor configuration into running threshold monitors

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, instrument, warn};

use crate::actors::messages::MonitoringStopped;
use crate::actors::monitor::{MonitorHandle, ThresholdSettings};
use crate::aggregator::Aggregator;
use crate::config::Monitor;
use crate::notifier::{EmailNotifier, Mailer, NotifierContext};

/// Reason reported once all triggers of a monitor have exited
pub const MONITORING_STOPPED: &str = "monitoring_stopped";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("no triggers registered for {0}")]
    NoTriggers(String),

    #[error("unsupported monitor type {kind:?} for {metric}")]
    UnsupportedType { metric: String, kind: String },
}

/// The threshold monitors spawned for one configured monitor
#[derive(Debug)]
pub struct MonitorGroup {
    pub metric: String,

    pub handles: Vec<MonitorHandle>,

    /// Resolves once every monitor in the group has exited
    pub completion: oneshot::Receiver<MonitoringStopped>,
}

pub struct MonitoringAgent {
    aggregator: Arc<dyn Aggregator>,

    mailer: Arc<dyn Mailer>,

    context: NotifierContext,

    cancel: watch::Receiver<bool>,
}

impl MonitoringAgent {
    pub fn new(
        aggregator: Arc<dyn Aggregator>,
        mailer: Arc<dyn Mailer>,
        context: NotifierContext,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            aggregator,
            mailer,
            context,
            cancel,
        }
    }

    /// Spawn one threshold monitor per trigger of a counter monitor
    #[instrument(skip_all, fields(metric = %monitor.metric))]
    pub fn monitor_counter(&self, monitor: &Monitor) -> Result<MonitorGroup, AgentError> {
        if !monitor.is_counter() {
            return Err(AgentError::UnsupportedType {
                metric: monitor.metric.clone(),
                kind: monitor.kind.clone(),
            });
        }

        if monitor.triggers.is_empty() {
            return Err(AgentError::NoTriggers(monitor.metric.clone()));
        }

        info!("starting count metric monitor with {} triggers", monitor.triggers.len());

        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        let handles = monitor
            .triggers
            .iter()
            .map(|trigger| {
                let notifier = EmailNotifier::new(self.mailer.clone(), trigger, &self.context);
                let settings = ThresholdSettings {
                    metric: monitor.metric.clone(),
                    threshold: trigger.threshold,
                    interval: monitor.interval(),
                    environment: self.context.environment.clone(),
                };

                MonitorHandle::spawn(
                    settings,
                    self.aggregator.clone(),
                    Box::new(notifier),
                    self.cancel.clone(),
                    done_tx.clone(),
                )
            })
            .collect();
        drop(done_tx);

        let (completion_tx, completion) = oneshot::channel();
        let metric = monitor.metric.clone();

        tokio::spawn(async move {
            // Nothing is ever sent, the channel closes once every monitor dropped its sender.
            while done_rx.recv().await.is_some() {}

            info!("all monitors for {metric} resolved");
            let _ = completion_tx.send(MonitoringStopped {
                metric,
                reason: MONITORING_STOPPED.to_string(),
            });
        });

        Ok(MonitorGroup {
            metric: monitor.metric.clone(),
            handles,
            completion,
        })
    }

    /// Start every supported monitor, skipping the ones that cannot run
    pub fn start(&self, monitors: &[Monitor]) -> RunningAgent {
        let mut running = RunningAgent::default();

        for monitor in monitors {
            match self.monitor_counter(monitor) {
                Ok(group) => {
                    running.handles.extend(group.handles);
                    running.completions.push(group.completion);
                }
                Err(e) => warn!("could not start monitoring {}: {e}", monitor.metric),
            }
        }

        info!(
            "monitoring {} metrics with {} triggers",
            running.completions.len(),
            running.handles.len()
        );

        running
    }

    /// Start every supported monitor and wait until all of them stopped
    pub async fn run(&self, monitors: &[Monitor]) -> Vec<MonitoringStopped> {
        self.start(monitors).wait().await
    }
}

/// Metrics watched by counter monitors, and the longest of their windows
pub fn retention_targets(monitors: &[Monitor]) -> (Vec<String>, Duration) {
    let mut metrics: Vec<String> = Vec::new();
    let mut longest = Duration::ZERO;

    for monitor in monitors.iter().filter(|monitor| monitor.is_counter()) {
        if !metrics.contains(&monitor.metric) {
            metrics.push(monitor.metric.clone());
        }
        longest = longest.max(monitor.interval());
    }

    (metrics, longest)
}

/// Monitors started by [`MonitoringAgent::start`]
#[derive(Default)]
pub struct RunningAgent {
    handles: Vec<MonitorHandle>,

    completions: FuturesUnordered<oneshot::Receiver<MonitoringStopped>>,
}

impl RunningAgent {
    pub fn handles(&self) -> &[MonitorHandle] {
        &self.handles
    }

    /// Number of monitor groups that have not reported completion yet
    pub fn pending(&self) -> usize {
        self.completions.len()
    }

    /// Next monitor group to complete, `None` once all of them have
    pub async fn next_stopped(&mut self) -> Option<MonitoringStopped> {
        while let Some(result) = self.completions.next().await {
            match result {
                Ok(stopped) => return Some(stopped),
                Err(_) => warn!("monitor group vanished without reporting"),
            }
        }
        None
    }

    /// Stop every monitor, waiting for each acknowledgement
    pub async fn stop_all(&self) {
        join_all(self.handles.iter().map(|handle| handle.stop())).await;
    }

    /// Wait for every monitor group, logging each reported stop
    pub async fn wait(mut self) -> Vec<MonitoringStopped> {
        let mut stopped = Vec::new();

        while let Some(event) = self.next_stopped().await {
            info!("monitor for {} stopped: {}", event.metric, event.reason);
            stopped.push(event);
        }

        stopped
    }
}
