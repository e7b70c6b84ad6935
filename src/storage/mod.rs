//! Storage backends for the target registry and result series
//!
//! This module provides a trait-based abstraction over where targets and
//! measurement results are kept.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with the Tokio loops
//! - **Write-through**: Every mutation is durable when the call returns
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database shared with the CLI
//! - **In-Memory**: No persistence, for testing or `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use throughput_monitor::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./throughput.db").await?;
//!     let targets = backend.list_targets().await?;
//!     println!("{} targets", targets.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use schema::{ResultRecord, SeriesSummary, Upsert};

use crate::config::StorageConfig;

/// Open the backend selected by `config`
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage (results are not persisted)");
            Ok(Arc::new(memory::MemoryBackend::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { path } => Err(StorageError::Unavailable(format!(
            "SQLite support not compiled in, cannot open {}",
            path.display()
        ))),
    }
}
