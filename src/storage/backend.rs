//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{ResultRecord, Upsert};
use crate::target::{Target, TargetId};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// A backend holds two things: the target registry and the per-target
/// result series. Every write must be durable when the call returns;
/// there is no write-back cache anywhere above this trait.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared by every
/// measurement loop.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>` which wraps `StorageError`.
/// Implementations should convert backend-specific errors to
/// `StorageError` variants.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Target registry
    // ========================================================================

    /// All targets, ordered by hostname then port
    async fn list_targets(&self) -> StorageResult<Vec<Target>>;

    /// A single target, if registered
    async fn get_target(&self, id: &TargetId) -> StorageResult<Option<Target>>;

    /// Insert the target, or update duration/interval of an existing entry
    /// with the same identity
    async fn upsert_target(&self, target: &Target) -> StorageResult<Upsert>;

    /// Delete a target; returns whether an entry existed
    async fn delete_target(&self, id: &TargetId) -> StorageResult<bool>;

    // ========================================================================
    // Result series
    // ========================================================================

    /// Append one record to a series
    ///
    /// Callers serialize appends per series (see `ResultStore`); backends
    /// only need to make each append atomic and durable.
    async fn append_result(&self, series: &str, record: &ResultRecord) -> StorageResult<()>;

    /// Records of a series in append order (oldest first)
    ///
    /// With a `limit`, only the most recent `limit` records are returned,
    /// still oldest first.
    async fn query_series(
        &self,
        series: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ResultRecord>>;

    /// Timestamp of the newest record in a series
    async fn last_timestamp(&self, series: &str) -> StorageResult<Option<i64>>;

    /// Drop a whole series; returns the number of records deleted
    async fn delete_series(&self, series: &str) -> StorageResult<usize>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Get backend-specific statistics
    ///
    /// Returns human-readable stats about the backend
    /// (e.g., "SQLite: 3 targets, 1200 results, 0.25 MB on disk").
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
