//! Result store
//!
//! Append/read access to the per-target series. Appends to the same series
//! are serialized through a per-series lock and their timestamps are clamped
//! so a series never goes backwards, even if the wall clock does.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{instrument, trace, warn};

use crate::probe::Measurement;
use crate::storage::{ResultRecord, SeriesSummary, StorageBackend, StorageResult};
use crate::target::Target;

#[derive(Clone)]
pub struct ResultStore {
    backend: Arc<dyn StorageBackend>,

    /// One append lock per series
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ResultStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            locks: Arc::default(),
        }
    }

    async fn series_lock(&self, series: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(series.to_string())
            .or_default()
            .clone()
    }

    /// Append a measurement to `series`
    ///
    /// Returns the record as stored. The append is durable once this returns.
    #[instrument(skip(self, measurement))]
    pub async fn append(&self, series: &str, measurement: &Measurement) -> StorageResult<ResultRecord> {
        let lock = self.series_lock(series).await;
        let _guard = lock.lock().await;

        let mut timestamp = measurement.timestamp.timestamp();
        if let Some(last) = self.backend.last_timestamp(series).await?
            && last > timestamp
        {
            warn!("clock went backwards ({timestamp} < {last}), clamping");
            timestamp = last;
        }

        let record = ResultRecord::new(timestamp, measurement.sent_mbps, measurement.received_mbps);
        self.backend.append_result(series, &record).await?;

        trace!("appended {:?}", record);
        Ok(record)
    }

    /// Whole series, oldest first
    pub async fn read(&self, series: &str) -> StorageResult<Vec<ResultRecord>> {
        self.backend.query_series(series, None).await
    }

    /// The most recent `limit` records, oldest first
    pub async fn read_latest(&self, series: &str, limit: usize) -> StorageResult<Vec<ResultRecord>> {
        self.backend.query_series(series, Some(limit)).await
    }

    pub async fn last_timestamp(&self, series: &str) -> StorageResult<Option<i64>> {
        self.backend.last_timestamp(series).await
    }

    /// Drop the series and its append lock
    #[instrument(skip(self))]
    pub async fn delete_series(&self, series: &str) -> StorageResult<usize> {
        let lock = self.series_lock(series).await;
        let deleted = {
            let _guard = lock.lock().await;
            self.backend.delete_series(series).await?
        };
        self.locks.lock().await.remove(series);
        Ok(deleted)
    }

    pub async fn summarize(&self, target: &Target, now: i64) -> StorageResult<SeriesSummary> {
        let records = self.read(&target.results_location).await?;
        let interval_secs = target.interval_duration().as_secs() as i64;
        Ok(SeriesSummary::from_records(&records, interval_secs, now))
    }
}
