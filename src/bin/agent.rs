use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tally::{
    actors::retention::{CLEANUP_INTERVAL, RetentionHandle},
    agent::{MonitoringAgent, retention_targets},
    aggregator::CountAggregator,
    config::{AppConfig, ConfigError, read_monitor_config},
    notifier::{NotifierContext, mailer_for},
    storage::{WindowStore, open_backend},
    util::wait_for_shutdown,
};
use tokio::sync::watch;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Monitor config file (defaults to MONITOR_CONFIG_FILE)
    #[arg(short)]
    file: Option<PathBuf>,
}

fn init() {
    let level = std::env::var("TALLY_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::DEBUG);

    let filter = filter::Targets::new().with_targets(vec![("tally", level), ("tally_agent", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let config = AppConfig::from_env().context("failed to read configuration")?;
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args
        .file
        .or_else(|| config.monitor_config_file.clone())
        .ok_or(ConfigError::Missing("MONITOR_CONFIG_FILE"))?;
    let monitors = read_monitor_config(&path, &config.service_name)?;

    let backend = open_backend(&config.storage).await?;
    let store = WindowStore::new(backend.clone());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let agent = MonitoringAgent::new(
        Arc::new(CountAggregator::new(store.clone())),
        mailer_for(&config)?,
        NotifierContext::from(&config),
        cancel_rx,
    );

    let (metrics, longest) = retention_targets(&monitors);
    let retention = RetentionHandle::spawn(
        store,
        metrics,
        config.retention,
        longest,
        CLEANUP_INTERVAL,
    );

    let running = agent.start(&monitors);
    if running.pending() == 0 {
        warn!("no counter monitor could be started");
    }

    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = cancel_tx.send(true);
    });

    let stopped = running.wait().await;
    info!("all {} monitors stopped", stopped.len());

    retention.shutdown().await?;
    backend.close().await?;

    Ok(())
}
