//! Target registry
//!
//! Thin, validated view over the backend's `targets` table. There is no
//! cache: every call goes to storage, so the scheduler always sees the
//! latest committed write, including writes made by another process.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::MonitorError;
use crate::storage::{StorageBackend, StorageResult, Upsert};
use crate::target::{Target, TargetId};

#[derive(Clone)]
pub struct TargetRegistry {
    backend: Arc<dyn StorageBackend>,
}

impl TargetRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn list(&self) -> StorageResult<Vec<Target>> {
        self.backend.list_targets().await
    }

    pub async fn get(&self, id: &TargetId) -> StorageResult<Option<Target>> {
        self.backend.get_target(id).await
    }

    /// Insert a target or update its duration/interval in place
    ///
    /// Parameters are validated before storage is touched.
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        hostname: &str,
        port: u16,
        duration: u32,
        interval: u32,
    ) -> Result<(Target, Upsert), MonitorError> {
        let target = Target::new(hostname, port, duration, interval)?;
        let outcome = self.backend.upsert_target(&target).await?;

        match outcome {
            Upsert::Inserted => info!(
                "added target {} ({}s every {}m)",
                target.id(),
                duration,
                interval
            ),
            Upsert::Updated => info!(
                "updated target {} ({}s every {}m)",
                target.id(),
                duration,
                interval
            ),
            Upsert::Unchanged => debug!("target {} already configured", target.id()),
        }

        Ok((target, outcome))
    }

    /// Delete a target; a missing entry is not an error
    #[instrument(skip(self), fields(target = %id))]
    pub async fn remove(&self, id: &TargetId) -> StorageResult<bool> {
        let removed = self.backend.delete_target(id).await?;
        if removed {
            info!("removed target {id}");
        } else {
            debug!("remove requested for unknown target {id}");
        }
        Ok(removed)
    }
}
