//! Storage failures

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// The database file could not be opened or created
    Open(String),

    /// A statement against an open database failed
    Query(String),

    /// Schema migrations could not be applied
    Migration(String),

    /// A stored row could not be turned back into a target or result
    CorruptRow(String),

    /// The backend is closed or not compiled in
    Unavailable(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Open(msg) => write!(f, "cannot open results database: {msg}"),
            StorageError::Query(msg) => write!(f, "results database query failed: {msg}"),
            StorageError::Migration(msg) => write!(f, "cannot migrate results database: {msg}"),
            StorageError::CorruptRow(msg) => write!(f, "corrupt stored row: {msg}"),
            StorageError::Unavailable(msg) => write!(f, "storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => StorageError::Unavailable("database closed".to_string()),
            sqlx::Error::Io(e) => StorageError::Open(e.to_string()),
            other => StorageError::Query(other.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Migration(err.to_string())
    }
}
