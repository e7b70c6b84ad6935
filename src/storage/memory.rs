//! In-memory storage backend (no persistence)
//!
//! This backend keeps targets and result series in process memory.
//! It's useful for:
//! - Testing without database dependencies
//! - `"backend": "none"` deployments that only need live results
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single process**: Other processes (e.g. the CLI) cannot see the data

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{ResultRecord, Upsert};
use crate::target::{Target, TargetId};

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    /// Targets keyed by identity; BTreeMap keeps listing order stable
    targets: RwLock<BTreeMap<TargetId, Target>>,

    /// Result series keyed by results location
    series: RwLock<HashMap<String, Vec<ResultRecord>>>,

    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable(
                "in-memory backend is closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn list_targets(&self) -> StorageResult<Vec<Target>> {
        self.ensure_open()?;
        Ok(self.targets.read().await.values().cloned().collect())
    }

    async fn get_target(&self, id: &TargetId) -> StorageResult<Option<Target>> {
        self.ensure_open()?;
        Ok(self.targets.read().await.get(id).cloned())
    }

    async fn upsert_target(&self, target: &Target) -> StorageResult<Upsert> {
        self.ensure_open()?;
        let mut targets = self.targets.write().await;

        let outcome = match targets.get(&target.id()) {
            None => Upsert::Inserted,
            Some(existing) if existing.same_schedule(target) => Upsert::Unchanged,
            Some(_) => Upsert::Updated,
        };

        if outcome != Upsert::Unchanged {
            targets.insert(target.id(), target.clone());
        }

        debug!("in-memory upsert of {}: {:?}", target.id(), outcome);
        Ok(outcome)
    }

    async fn delete_target(&self, id: &TargetId) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.targets.write().await.remove(id).is_some())
    }

    async fn append_result(&self, series: &str, record: &ResultRecord) -> StorageResult<()> {
        self.ensure_open()?;
        self.series
            .write()
            .await
            .entry(series.to_string())
            .or_default()
            .push(*record);
        Ok(())
    }

    async fn query_series(
        &self,
        series: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ResultRecord>> {
        self.ensure_open()?;
        let all = self.series.read().await;

        let records = all
            .get(series)
            .map(|records| {
                let skip = limit.map_or(0, |limit| records.len().saturating_sub(limit));
                records[skip..].to_vec()
            })
            .unwrap_or_default();

        Ok(records)
    }

    async fn last_timestamp(&self, series: &str) -> StorageResult<Option<i64>> {
        self.ensure_open()?;
        Ok(self
            .series
            .read()
            .await
            .get(series)
            .and_then(|records| records.iter().map(|r| r.timestamp).max()))
    }

    async fn delete_series(&self, series: &str) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self
            .series
            .write()
            .await
            .remove(series)
            .map_or(0, |records| records.len()))
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let healthy = !self.closed.load(Ordering::Acquire);
        let total: usize = self.series.read().await.values().map(Vec::len).sum();

        Ok(HealthStatus {
            healthy,
            message: if healthy {
                "In-memory storage operational".to_string()
            } else {
                "In-memory storage closed".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_results".to_string(), total.to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let targets = self.targets.read().await.len();
        let series = self.series.read().await;
        let total: usize = series.values().map(Vec::len).sum();

        Ok(format!(
            "In-Memory: {} targets, {} results across {} series",
            targets,
            total,
            series.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
