//! SQLite-backed [`VectorStore`] implementation.
//!
//! Collections live in `vector_collections`, vectors in `vector_entries`
//! as little-endian `f32` blobs. [`Filter`]s are translated into a SQL
//! `WHERE` clause with bound parameters; similarity search is a
//! brute-force cosine scan over the filtered rows.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::StoreError;
use crate::models::ChunkMetadata;

use super::{sort_hits, BackendKind, Filter, QueryHit, SearchHit, VectorDocument, VectorStore};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>, StoreError> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn require_collection(&self, collection: &str) -> Result<usize, StoreError> {
        self.collection_dims(collection)
            .await?
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    /// Rows of `collection` matching `filter`, including the embedding blob.
    async fn filtered_rows(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<sqlx::sqlite::SqliteRow>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, relative_path, start_line, end_line, file_extension, content, embedding \
             FROM vector_entries WHERE collection = ",
        );
        qb.push_bind(collection.to_string());
        qb.push(" AND ");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY relative_path ASC, start_line ASC, id ASC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        Ok(qb.build().fetch_all(&self.pool).await?)
    }
}

/// Append the SQL form of `filter` to `qb`.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    match filter {
        Filter::Any => {
            qb.push("1 = 1");
        }
        Filter::RelativePath(path) => {
            qb.push("relative_path = ");
            qb.push_bind(path.clone());
        }
        Filter::PathPrefix(prefix) => {
            let prefix = prefix.trim_end_matches('/');
            if prefix.is_empty() {
                qb.push("1 = 1");
            } else {
                let prefix = format!("{}/", prefix);
                qb.push("substr(relative_path, 1, ");
                qb.push_bind(prefix.chars().count() as i64);
                qb.push(") = ");
                qb.push_bind(prefix);
            }
        }
        Filter::FileExtension(ext) => {
            qb.push("file_extension = ");
            qb.push_bind(ext.trim_start_matches('.').to_string());
        }
        Filter::And(inner) => push_group(qb, inner, " AND ", "1 = 1"),
        Filter::Or(inner) => push_group(qb, inner, " OR ", "1 = 0"),
    }
}

fn push_group(qb: &mut QueryBuilder<'_, Sqlite>, inner: &[Filter], op: &str, empty: &str) {
    if inner.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, f) in inner.iter().enumerate() {
        if i > 0 {
            qb.push(op);
        }
        push_filter(qb, f);
    }
    qb.push(")");
}

fn row_metadata(row: &sqlx::sqlite::SqliteRow) -> ChunkMetadata {
    let start_line: i64 = row.get("start_line");
    let end_line: i64 = row.get("end_line");
    ChunkMetadata {
        relative_path: row.get("relative_path"),
        start_line: start_line as usize,
        end_line: end_line as usize,
        file_extension: row.get("file_extension"),
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<(), StoreError> {
        if let Some(existing) = self.collection_dims(collection).await? {
            if existing != dims {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: existing,
                    actual: dims,
                });
            }
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO vector_collections (name, dims, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(collection)
        .bind(dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vector_entries WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM vector_collections WHERE name = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn has_collection(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.collection_dims(collection).await?.is_some())
    }

    async fn upsert(&self, collection: &str, docs: &[VectorDocument]) -> Result<(), StoreError> {
        let dims = self.require_collection(collection).await?;
        if let Some(bad) = docs.iter().find(|d| d.vector.len() != dims) {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: dims,
                actual: bad.vector.len(),
            });
        }

        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO vector_entries (collection, id, relative_path, start_line, end_line,
                                            file_extension, content, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    relative_path = excluded.relative_path,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    file_extension = excluded.file_extension,
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection)
            .bind(&doc.id)
            .bind(&doc.metadata.relative_path)
            .bind(doc.metadata.start_line as i64)
            .bind(doc.metadata.end_line as i64)
            .bind(&doc.metadata.file_extension)
            .bind(&doc.content)
            .bind(vec_to_blob(&doc.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        self.require_collection(collection).await?;
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM vector_entries WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<QueryHit>, StoreError> {
        self.require_collection(collection).await?;
        let rows = self.filtered_rows(collection, filter, Some(limit)).await?;
        Ok(rows
            .iter()
            .map(|row| QueryHit {
                id: row.get("id"),
                content: row.get("content"),
                metadata: row_metadata(row),
            })
            .collect())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.require_collection(collection).await?;
        let rows = self
            .filtered_rows(collection, filter.unwrap_or(&Filter::Any), None)
            .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                SearchHit {
                    id: row.get("id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    content: row.get("content"),
                    metadata: row_metadata(row),
                }
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_entries WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
