//! Error and Result types for logging engine operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for logging engine operations.
pub type Result<T> = std::result::Result<T, LogError>;

/// The error type for ingestion, flush, and query operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying relational store error.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error while writing a quarantine sidecar.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A persisted level code that does not map to any [`Level`].
    ///
    /// [`Level`]: crate::model::Level
    #[error("Unknown level code: {0}")]
    UnknownLevel(i64),

    /// Page size passed to the query builder must be positive.
    #[error("Invalid page size: {0}")]
    InvalidPageSize(i32),

    /// The background worker thread could not be spawned.
    #[error("Worker spawn failed: {0}")]
    WorkerSpawn(io::Error),
}
