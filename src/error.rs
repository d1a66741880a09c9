//! Error types for scanning, reconciliation, and snapshot persistence.
//!
//! Fatal errors abort a run ([`ScanError`], [`SyncError::SnapshotPersist`]).
//! Per-file errors ([`FileReadError`], [`EmbeddingError`], [`StoreError`])
//! are collected into [`FileFailure`]s and never stop sibling files.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// The codebase root could not be walked.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Codebase root is unreadable: {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Codebase root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// A single file (or directory) could not be read. The file is skipped.
#[derive(Debug, Error)]
#[error("Failed to read {relative_path}: {source}")]
pub struct FileReadError {
    pub relative_path: String,
    #[source]
    pub source: std::io::Error,
}

/// Failure of the embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Rate limiting, 5xx, or a network error. Worth retrying.
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    /// The provider rejected the request. Retrying will not help.
    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Embedding response has {actual} vectors of dimension {dims}, expected {expected} of dimension {expected_dims}")]
    Shape {
        expected: usize,
        expected_dims: usize,
        actual: usize,
        dims: usize,
    },
}

/// Failure of a vector-store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Dimension mismatch in collection {collection}: expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Vector store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Vector store backend error: {0}")]
    Backend(String),
}

/// Failure to read or write the durable snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Snapshot not found for codebase {0}")]
    Missing(String),

    #[error("Corrupt snapshot row for {relative_path}: {reason}")]
    Corrupt {
        relative_path: String,
        reason: String,
    },
}

/// Errors that end a sync request.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Snapshot could not be loaded: {0}")]
    SnapshotLoad(#[source] SnapshotError),

    #[error("Snapshot could not be persisted; the previous snapshot is still valid: {0}")]
    SnapshotPersist(#[source] SnapshotError),

    #[error("A sync run is already active for {root}")]
    AlreadyRunning { root: PathBuf },

    #[error("Could not prepare collection {collection}: {source}")]
    CollectionSetup {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Sync task failed: {0}")]
    Join(String),
}

/// Errors the retry policy knows how to classify.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_transient(&self) -> bool;
    /// The error to report when a single attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for EmbeddingError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Transient(_) | EmbeddingError::Timeout(_)
        )
    }

    fn timed_out(after: Duration) -> Self {
        EmbeddingError::Timeout(after)
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::Backend(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Database(_)
            ),
            StoreError::CollectionNotFound(_) | StoreError::DimensionMismatch { .. } => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        StoreError::Timeout(after)
    }
}

/// Which stage of a file's reconciliation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FileRead,
    Embedding,
    Store,
}

/// A per-file failure surfaced at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct FileFailure {
    pub relative_path: String,
    pub kind: FailureKind,
    pub message: String,
}

impl FileFailure {
    pub fn new(relative_path: &str, kind: FailureKind, err: &dyn std::fmt::Display) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            kind,
            message: err.to_string(),
        }
    }
}

impl From<&FileReadError> for FileFailure {
    fn from(err: &FileReadError) -> Self {
        FileFailure::new(&err.relative_path, FailureKind::FileRead, err)
    }
}
