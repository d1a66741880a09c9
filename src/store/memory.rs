//! In-memory [`VectorStore`] implementation for tests and ephemeral runs.
//!
//! Collections are `HashMap`s behind a `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every vector in the collection.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;

use super::{sort_hits, BackendKind, Filter, QueryHit, SearchHit, VectorDocument, VectorStore};

struct Collection {
    dims: usize,
    docs: HashMap<String, VectorDocument>,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Ids currently stored in `collection`, sorted. Empty if it does not exist.
    pub fn ids(&self, collection: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .get(collection)
            .map(|c| c.docs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<VectorDocument> {
        self.read()
            .get(collection)
            .and_then(|c| c.docs.get(id).cloned())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<(), StoreError> {
        let mut collections = self.write();
        if let Some(existing) = collections.get(collection) {
            if existing.dims != dims {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: existing.dims,
                    actual: dims,
                });
            }
            return Ok(());
        }
        collections.insert(
            collection.to_string(),
            Collection {
                dims,
                docs: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.write().remove(collection);
        Ok(())
    }

    async fn has_collection(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.read().contains_key(collection))
    }

    async fn upsert(&self, collection: &str, docs: &[VectorDocument]) -> Result<(), StoreError> {
        let mut collections = self.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if let Some(bad) = docs.iter().find(|d| d.vector.len() != coll.dims) {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: coll.dims,
                actual: bad.vector.len(),
            });
        }
        for doc in docs {
            coll.docs.insert(doc.id.clone(), doc.clone());
        }
        Ok(())
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut collections = self.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        for id in ids {
            coll.docs.remove(id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<QueryHit>, StoreError> {
        let collections = self.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let mut hits: Vec<QueryHit> = coll
            .docs
            .values()
            .filter(|d| filter.matches(&d.metadata))
            .map(|d| QueryHit {
                id: d.id.clone(),
                content: d.content.clone(),
                metadata: d.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.metadata
                .relative_path
                .cmp(&b.metadata.relative_path)
                .then(a.metadata.start_line.cmp(&b.metadata.start_line))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let collections = self.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let mut hits: Vec<SearchHit> = coll
            .docs
            .values()
            .filter(|d| filter.map_or(true, |f| f.matches(&d.metadata)))
            .map(|d| SearchHit {
                id: d.id.clone(),
                score: cosine_similarity(vector, &d.vector),
                content: d.content.clone(),
                metadata: d.metadata.clone(),
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self
            .read()
            .get(collection)
            .map(|c| c.docs.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn doc(id: &str, path: &str, vector: Vec<f32>) -> VectorDocument {
        VectorDocument {
            id: id.to_string(),
            vector,
            content: format!("content of {}", id),
            metadata: ChunkMetadata {
                relative_path: path.to_string(),
                start_line: 1,
                end_line: 5,
                file_extension: crate::models::file_extension(path),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_delete_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert("c", &[doc("a", "a.rs", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("c", &[doc("a", "a.rs", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
        assert_eq!(store.get("c", "a").unwrap().vector, vec![0.0, 1.0]);

        store.delete_by_ids("c", &["a".to_string()]).await.unwrap();
        store.delete_by_ids("c", &["a".to_string()]).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_is_enforced() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 3).await.unwrap();
        let err = store
            .upsert("c", &[doc("a", "a.rs", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
        assert!(store.create_collection("c", 4).await.is_err());
        assert!(store.create_collection("c", 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_collection_errors() {
        let store = InMemoryVectorStore::new();
        assert!(!store.has_collection("nope").await.unwrap());
        let err = store.upsert("nope", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity_and_filters() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                &[
                    doc("x", "src/x.rs", vec![1.0, 0.0]),
                    doc("y", "src/y.ts", vec![0.7, 0.7]),
                    doc("z", "docs/z.md", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("c", &[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(
            hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            vec!["x", "y"]
        );

        let filter = Filter::FileExtension("ts".into());
        let hits = store
            .search("c", &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "y");

        let rows = store
            .query("c", &Filter::PathPrefix("src".into()), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_collection_removes_everything() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert("c", &[doc("a", "a.rs", vec![1.0, 0.0])])
            .await
            .unwrap();
        store.drop_collection("c").await.unwrap();
        assert!(!store.has_collection("c").await.unwrap());
        assert_eq!(store.count("c").await.unwrap(), 0);
        store.drop_collection("c").await.unwrap();
    }
}
