//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (the CLI, a dashboard) never block the scheduler's appends
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Durability
//!
//! Every registry mutation and every result append is its own committed
//! statement or transaction. A second process opening the same file sees the
//! change as soon as the call returns.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{ResultRecord, Upsert};
use crate::target::{Target, TargetId};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode with a busy timeout
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use throughput_monitor::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./throughput.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Open(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn row_to_target(row: &SqliteRow) -> StorageResult<Target> {
        let hostname: String = row.try_get("hostname")?;
        let port: i64 = row.try_get("port")?;
        let duration: i64 = row.try_get("duration_secs")?;
        let interval: i64 = row.try_get("interval_mins")?;

        let port = u16::try_from(port)
            .map_err(|_| StorageError::CorruptRow(format!("port {port} for {hostname}")))?;
        let duration = u32::try_from(duration)
            .map_err(|_| StorageError::CorruptRow(format!("duration {duration} for {hostname}")))?;
        let interval = u32::try_from(interval)
            .map_err(|_| StorageError::CorruptRow(format!("interval {interval} for {hostname}")))?;

        Target::new(hostname, port, duration, interval)
            .map_err(|e| StorageError::CorruptRow(e.to_string()))
    }

    fn row_to_record(row: &SqliteRow) -> StorageResult<ResultRecord> {
        Ok(ResultRecord {
            timestamp: row.try_get("timestamp")?,
            sent_mbps: row.try_get("sent_mbps")?,
            received_mbps: row.try_get("received_mbps")?,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn list_targets(&self) -> StorageResult<Vec<Target>> {
        let rows = sqlx::query(
            r#"
            SELECT hostname, port, duration_secs, interval_mins
            FROM targets
            ORDER BY hostname ASC, port ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_target).collect()
    }

    #[instrument(skip(self), fields(target = %id))]
    async fn get_target(&self, id: &TargetId) -> StorageResult<Option<Target>> {
        let row = sqlx::query(
            r#"
            SELECT hostname, port, duration_secs, interval_mins
            FROM targets
            WHERE hostname = ? AND port = ?
            "#,
        )
        .bind(&id.hostname)
        .bind(id.port as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_target).transpose()
    }

    #[instrument(skip(self, target), fields(target = %target.id()))]
    async fn upsert_target(&self, target: &Target) -> StorageResult<Upsert> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64, i64)> = sqlx::query_as(
            "SELECT duration_secs, interval_mins FROM targets WHERE hostname = ? AND port = ?",
        )
        .bind(&target.hostname)
        .bind(target.port as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => Upsert::Inserted,
            Some((duration, interval))
                if duration == target.duration as i64 && interval == target.interval as i64 =>
            {
                Upsert::Unchanged
            }
            Some(_) => Upsert::Updated,
        };

        if outcome != Upsert::Unchanged {
            sqlx::query(
                r#"
                INSERT INTO targets (
                    hostname, port, duration_secs, interval_mins,
                    results_location, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (hostname, port) DO UPDATE SET
                    duration_secs = excluded.duration_secs,
                    interval_mins = excluded.interval_mins,
                    results_location = excluded.results_location,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&target.hostname)
            .bind(target.port as i64)
            .bind(target.duration as i64)
            .bind(target.interval as i64)
            .bind(&target.results_location)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("upsert complete: {:?}", outcome);
        Ok(outcome)
    }

    #[instrument(skip(self), fields(target = %id))]
    async fn delete_target(&self, id: &TargetId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM targets WHERE hostname = ? AND port = ?")
            .bind(&id.hostname)
            .bind(id.port as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, record))]
    async fn append_result(&self, series: &str, record: &ResultRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO results (series, timestamp, sent_mbps, received_mbps)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(series)
        .bind(record.timestamp)
        .bind(record.sent_mbps)
        .bind(record.received_mbps)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_series(
        &self,
        series: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ResultRecord>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    r#"
                    SELECT timestamp, sent_mbps, received_mbps
                    FROM results
                    WHERE series = ?
                    ORDER BY timestamp DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(series)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT timestamp, sent_mbps, received_mbps
                    FROM results
                    WHERE series = ?
                    ORDER BY timestamp ASC, id ASC
                    "#,
                )
                .bind(series)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<StorageResult<Vec<_>>>()?;

        if limit.is_some() {
            // Reverse to get chronological order (oldest first)
            records.reverse();
        }

        debug!("query returned {} results", records.len());
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn last_timestamp(&self, series: &str) -> StorageResult<Option<i64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(timestamp) FROM results WHERE series = ?")
            .bind(series)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    #[instrument(skip(self))]
    async fn delete_series(&self, series: &str) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM results WHERE series = ?")
            .bind(series)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} results from series {}", deleted, series);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let targets: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM targets")
            .fetch_one(&self.pool)
            .await?;

        let results: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results")
            .fetch_one(&self.pool)
            .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let file_size_mb = file_size as f64 / 1_000_000.0;

        Ok(format!(
            "SQLite: {} targets, {} results, {:.2} MB on disk",
            targets.0, results.0, file_size_mb
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
