//! Storage for counter observations
//!
//! This module provides a trait-based abstraction over the key-value
//! structures the sliding window needs, and the window store built on top.
//!
//! ## Design
//!
//! - **Trait-based**: `KvBackend` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Two structures per metric**: a hash of values and a sorted timestamp index
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database shared by collector and agent
//! - **In-Memory**: No persistence, for testing or single-process setups
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally::storage::{WindowStore, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./tally.db").await?;
//!     let store = WindowStore::new(Arc::new(backend));
//!     store.append("http.response.500", 1_700_000_000_000_000, 1.0).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;
pub mod window;

pub use backend::{HealthStatus, KvBackend, ScoreRange};
pub use error::{StorageError, StorageResult};
pub use window::{WindowStore, index_key};

/// Open the backend selected by `config`
pub async fn open_backend(config: &StorageConfig) -> anyhow::Result<Arc<dyn KvBackend>> {
    match config {
        StorageConfig::Memory => {
            info!("using in-memory storage (observations are lost on restart)");
            Ok(Arc::new(memory::MemoryBackend::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = sqlite::SqliteBackend::new(path)
                .await
                .with_context(|| format!("failed to open sqlite database {}", path.display()))?;
            Ok(Arc::new(backend))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}
