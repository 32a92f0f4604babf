use std::path::PathBuf;

use chrono::Utc;
use tracing::info;

const TALLY_SOCKET: &str = "TALLY_SOCKET";

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/tally.sock";

pub fn get_default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

pub fn get_socket_path() -> PathBuf {
    let path_from_env = std::env::var(TALLY_SOCKET);
    path_from_env.map_or_else(|_| get_default_socket_path(), PathBuf::from)
}

/// Microseconds since the unix epoch
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Resolves once the process receives Ctrl+C or SIGTERM
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
