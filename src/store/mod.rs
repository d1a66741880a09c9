//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the contract every backend implements:
//! collection lifecycle, id-keyed upsert and delete, filtered query, and
//! similarity search. All operations are idempotent on the id key:
//! re-upserting an id overwrites it, deleting a missing id is a no-op.
//!
//! Backends are selected explicitly through [`BackendKind`] when the store
//! is constructed; callers never inspect a store to guess what it is.
//!
//! | Backend | Module | Persistence |
//! |---------|--------|-------------|
//! | `memory` | [`memory`] | process lifetime |
//! | `sqlite` | [`sqlite`] | SQLite database shared with the snapshot store |

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::ChunkMetadata;

/// Which backend implementation a store is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "memory" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => anyhow::bail!(
                "Unknown vector store backend: '{}'. Must be memory or sqlite.",
                other
            ),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// One chunk vector with its metadata and text.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Structured metadata filter. Backends translate it into their own query
/// syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Matches everything.
    Any,
    RelativePath(String),
    /// Matches paths under a directory prefix (`"src"` matches `"src/a.rs"`).
    PathPrefix(String),
    FileExtension(String),
    /// All of the inner filters must match.
    And(Vec<Filter>),
    /// Any of the inner filters must match.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            Filter::Any => true,
            Filter::RelativePath(p) => metadata.relative_path == *p,
            Filter::PathPrefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                prefix.is_empty()
                    || metadata
                        .relative_path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Filter::FileExtension(ext) => {
                metadata.file_extension == ext.trim_start_matches('.')
            }
            Filter::And(inner) => inner.iter().all(|f| f.matches(metadata)),
            Filter::Or(inner) => inner.iter().any(|f| f.matches(metadata)),
        }
    }
}

/// A stored chunk returned by [`VectorStore::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub id: String,
    pub content: String,
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
}

/// A similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub content: String,
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
}

/// Abstract vector store backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](VectorStore::create_collection) | Create a collection of fixed dimension |
/// | [`drop_collection`](VectorStore::drop_collection) | Drop a collection and all its vectors |
/// | [`has_collection`](VectorStore::has_collection) | Check whether a collection exists |
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite documents by id |
/// | [`delete_by_ids`](VectorStore::delete_by_ids) | Delete documents by id |
/// | [`query`](VectorStore::query) | Filtered scan |
/// | [`search`](VectorStore::search) | Cosine similarity search |
/// | [`count`](VectorStore::count) | Number of documents in a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Creating an existing collection with the same dimension is a no-op.
    async fn create_collection(&self, collection: &str, dims: usize) -> Result<(), StoreError>;

    /// Dropping a missing collection is a no-op.
    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;

    async fn has_collection(&self, collection: &str) -> Result<bool, StoreError>;

    async fn upsert(&self, collection: &str, docs: &[VectorDocument]) -> Result<(), StoreError>;

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<(), StoreError>;

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<QueryHit>, StoreError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;
}

/// Build the store for `kind`. The SQLite backend shares `pool` with the
/// snapshot store.
pub fn create_store(kind: BackendKind, pool: &SqlitePool) -> Arc<dyn VectorStore> {
    match kind {
        BackendKind::Memory => Arc::new(memory::InMemoryVectorStore::new()),
        BackendKind::Sqlite => Arc::new(sqlite::SqliteVectorStore::new(pool.clone())),
    }
}

pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str) -> ChunkMetadata {
        ChunkMetadata {
            relative_path: path.to_string(),
            start_line: 1,
            end_line: 2,
            file_extension: crate::models::file_extension(path),
        }
    }

    #[test]
    fn test_filter_matching() {
        let m = meta("src/store/mod.rs");
        assert!(Filter::Any.matches(&m));
        assert!(Filter::RelativePath("src/store/mod.rs".into()).matches(&m));
        assert!(Filter::PathPrefix("src".into()).matches(&m));
        assert!(Filter::PathPrefix("src/store/".into()).matches(&m));
        assert!(!Filter::PathPrefix("sr".into()).matches(&m));
        assert!(Filter::FileExtension(".rs".into()).matches(&m));
        assert!(!Filter::And(vec![
            Filter::PathPrefix("src".into()),
            Filter::FileExtension("ts".into())
        ])
        .matches(&m));
        assert!(Filter::Or(vec![
            Filter::FileExtension("ts".into()),
            Filter::FileExtension("rs".into())
        ])
        .matches(&m));
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert!("qdrant".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Sqlite.to_string(), "sqlite");
    }
}
