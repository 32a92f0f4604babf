use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tally::{
    actors::{collector::CollectorHandle, retention::{CLEANUP_INTERVAL, RetentionHandle}},
    agent::{MonitoringAgent, retention_targets},
    aggregator::CountAggregator,
    config::{AppConfig, read_monitor_config},
    notifier::{NotifierContext, mailer_for},
    rpc::MetricServer,
    storage::{WindowStore, open_backend},
    util::wait_for_shutdown,
};
use tokio::sync::watch;
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Socket path (defaults to TALLY_SOCKET or /tmp/tally.sock)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Monitor config file; also runs the monitoring agent in this process
    #[arg(short = 'f', long)]
    monitors: Option<PathBuf>,
}

fn init() {
    let level = std::env::var("TALLY_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::DEBUG);

    let filter = filter::Targets::new().with_targets(vec![("tally", level), ("tally_collector", level)]);
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

    let backend = open_backend(&config.storage).await?;
    let store = WindowStore::new(backend.clone());
    let collector = CollectorHandle::spawn(store.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let socket = args.socket.unwrap_or_else(|| config.socket_path.clone());
    let server = MetricServer::bind(&socket, collector.clone())
        .with_context(|| format!("failed to bind {}", socket.display()))?;
    let server_task = tokio::spawn(server.run(shutdown_rx.clone()));

    let mut agent_task = None;
    let mut retention = None;

    if let Some(path) = args.monitors {
        let monitors = read_monitor_config(&path, &config.service_name)?;
        let agent = MonitoringAgent::new(
            Arc::new(CountAggregator::new(store.clone())),
            mailer_for(&config)?,
            NotifierContext::from(&config),
            shutdown_rx.clone(),
        );

        let (metrics, longest) = retention_targets(&monitors);
        retention = Some(RetentionHandle::spawn(
            store.clone(),
            metrics,
            config.retention,
            longest,
            CLEANUP_INTERVAL,
        ));

        let running = agent.start(&monitors);
        agent_task = Some(tokio::spawn(running.wait()));
    }

    info!("collector running");
    wait_for_shutdown().await;

    let _ = shutdown_tx.send(true);

    if let Err(e) = server_task.await? {
        error!("metric server failed: {e:#}");
    }

    if let Some(task) = agent_task {
        let stopped = task.await?;
        debug!("{} monitors stopped", stopped.len());
    }

    if let Some(retention) = retention {
        retention.shutdown().await?;
    }

    collector.shutdown().await?;
    backend.close().await?;

    Ok(())
}
