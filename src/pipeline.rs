//! Reconciliation pipeline: turn one planned file into vector-store
//! mutations.
//!
//! For each file the pipeline:
//!
//! 1. Deletes the chunk ids the snapshot says the file owns, together with
//!    any chunk the store still holds under the same path from a run that
//!    never committed. Nothing new is written for the file until this
//!    succeeds.
//! 2. Reads the file, recomputes its fingerprint from the bytes actually
//!    read, and chunks it. Binary, non-UTF-8 and oversized files yield zero
//!    chunks.
//! 3. Embeds the chunk texts in bounded batches and upserts
//!    `(id, vector, metadata)` into the collection. Every embedding and
//!    store call goes through the [`RetryPolicy`].
//!
//! The pipeline never touches the snapshot. It returns a [`FileOutcome`]
//! carrying the [`FileCommit`] the orchestrator should persist. Failures
//! are captured in the outcome and never propagate to sibling files.

use std::path::Path;
use std::sync::Arc;

use crate::chunk::{chunk_id, Chunker};
use crate::embedding::{validate_batch, Embedder};
use crate::error::{EmbeddingError, FailureKind, FileFailure, FileReadError, StoreError};
use crate::models::{
    ChunkMetadata, ChunkRecord, CodeChunk, FileCommit, FileEntry, FileFingerprint,
};
use crate::retry::RetryPolicy;
use crate::scanner::fingerprint_bytes;
use crate::store::{Filter, VectorDocument, VectorStore};

/// How a planned file has to be reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Add,
    Modify,
    Remove,
}

/// One unit of pipeline work.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub relative_path: String,
    pub action: FileAction,
    /// The snapshot entry currently recorded for the path, if any.
    pub prior: Option<FileEntry>,
}

/// Result of reconciling one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// New chunks are in the store and `deleted` old ones are gone.
    Indexed {
        commit: FileCommit,
        chunks: Vec<ChunkRecord>,
        deleted: usize,
    },
    /// The file is gone and its chunks were deleted.
    Removed { commit: FileCommit, deleted: usize },
    /// Something failed. `commit`, when present, records that the file's
    /// previous chunks were already deleted while keeping its stale
    /// fingerprint, so the next run picks it up again.
    Failed {
        failure: FileFailure,
        commit: Option<FileCommit>,
    },
}

impl FileOutcome {
    pub fn commit(&self) -> Option<&FileCommit> {
        match self {
            FileOutcome::Indexed { commit, .. } | FileOutcome::Removed { commit, .. } => {
                Some(commit)
            }
            FileOutcome::Failed { commit, .. } => commit.as_ref(),
        }
    }

    pub fn failure(&self) -> Option<&FileFailure> {
        match self {
            FileOutcome::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// Chunker, embedder and store bound together with the retry policy.
#[derive(Clone)]
pub struct Pipeline {
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    embed_batch_size: usize,
    max_file_bytes: u64,
}

impl Pipeline {
    pub fn new(
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            retry,
            embed_batch_size: 64,
            max_file_bytes: 1024 * 1024,
        }
    }

    /// Maximum number of chunk texts per embedding call.
    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    /// Files larger than this are tracked but produce no chunks.
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embed a single search query under the same retry policy as chunks.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = vec![query.to_string()];
        let mut vectors = self
            .retry
            .run("embed_query", || self.embedder.embed(&texts))
            .await?;
        validate_batch(&vectors, 1, self.embedder.dims())?;
        Ok(vectors.remove(0))
    }

    /// Reconcile one file against `collection`.
    pub async fn reconcile(&self, root: &Path, collection: &str, task: FileTask) -> FileOutcome {
        let path = task.relative_path.as_str();

        // Step 1: old chunks go first. Anything stored under the path counts,
        // including chunks an uncommitted earlier run left behind.
        let owned = match task.action {
            FileAction::Add => None,
            _ => task.prior.as_ref(),
        };
        let old_ids = match self.stored_ids(collection, path, owned).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to list previous chunks");
                return FileOutcome::Failed {
                    failure: FileFailure::new(path, FailureKind::Store, &e),
                    commit: None,
                };
            }
        };
        if !old_ids.is_empty() {
            let result = self
                .retry
                .run("delete_by_ids", || {
                    self.store.delete_by_ids(collection, &old_ids)
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(path, error = %e, "failed to delete previous chunks");
                return FileOutcome::Failed {
                    failure: FileFailure::new(path, FailureKind::Store, &e),
                    commit: None,
                };
            }
        }
        let deleted = old_ids.len();
        let stale = || stale_commit(path, task.prior.as_ref(), deleted);

        if task.action == FileAction::Remove {
            tracing::debug!(path, deleted, "removed file");
            return FileOutcome::Removed {
                commit: FileCommit::Remove {
                    relative_path: task.relative_path.clone(),
                },
                deleted,
            };
        }

        // Step 2: read, fingerprint, chunk.
        let (fingerprint, chunks) = match self.read_and_chunk(root, path).await {
            Ok(read) => read,
            Err(e) if e.source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path, "file vanished after scan, treating as removed");
                return FileOutcome::Removed {
                    commit: FileCommit::Remove {
                        relative_path: task.relative_path.clone(),
                    },
                    deleted,
                };
            }
            Err(e) => {
                tracing::warn!(path, error = %e.source, "failed to read file");
                return FileOutcome::Failed {
                    failure: FileFailure::from(&e),
                    commit: stale(),
                };
            }
        };

        let ids: Vec<String> = (0..chunks.len())
            .map(|i| chunk_id(path, i))
            .collect();

        // Step 3: embed and upsert, batch by batch.
        let mut written: Vec<String> = Vec::with_capacity(ids.len());
        for (batch_no, batch) in chunks.chunks(self.embed_batch_size).enumerate() {
            let offset = batch_no * self.embed_batch_size;
            let batch_ids = &ids[offset..offset + batch.len()];
            if let Err(failure) = self.write_batch(collection, path, batch, batch_ids).await {
                self.rollback(collection, path, &written).await;
                return FileOutcome::Failed {
                    failure,
                    commit: stale(),
                };
            }
            written.extend_from_slice(batch_ids);
        }

        tracing::debug!(path, chunks = ids.len(), deleted, "indexed file");
        let records = chunks
            .iter()
            .zip(&ids)
            .map(|(chunk, id)| ChunkRecord {
                id: id.clone(),
                relative_path: task.relative_path.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                collection: collection.to_string(),
            })
            .collect();
        FileOutcome::Indexed {
            chunks: records,
            deleted,
            commit: FileCommit::Upsert {
                relative_path: task.relative_path.clone(),
                entry: FileEntry {
                    fingerprint,
                    chunk_ids: ids,
                },
            },
        }
    }

    /// Ids the snapshot recorded for `relative_path` plus any other chunk
    /// the store holds for it.
    async fn stored_ids(
        &self,
        collection: &str,
        relative_path: &str,
        prior: Option<&FileEntry>,
    ) -> Result<Vec<String>, StoreError> {
        let filter = Filter::RelativePath(relative_path.to_string());
        let hits = self
            .retry
            .run("query", || self.store.query(collection, &filter, usize::MAX))
            .await?;
        let mut ids: Vec<String> = prior.map(|p| p.chunk_ids.clone()).unwrap_or_default();
        for hit in hits {
            if !ids.contains(&hit.id) {
                ids.push(hit.id);
            }
        }
        Ok(ids)
    }

    async fn read_and_chunk(
        &self,
        root: &Path,
        relative_path: &str,
    ) -> Result<(FileFingerprint, Vec<CodeChunk>), FileReadError> {
        let wrap = |source: std::io::Error| FileReadError {
            relative_path: relative_path.to_string(),
            source,
        };
        let full = root.join(relative_path);
        let metadata = tokio::fs::symlink_metadata(&full).await.map_err(wrap)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let bytes = tokio::fs::read(&full).await.map_err(wrap)?;
        let fingerprint = fingerprint_bytes(relative_path, &bytes, modified);

        if bytes.len() as u64 > self.max_file_bytes {
            tracing::debug!(path = relative_path, size = bytes.len(), "file too large, no chunks");
            return Ok((fingerprint, Vec::new()));
        }
        let chunks = match std::str::from_utf8(&bytes) {
            Ok(text) if !text.contains('\0') => self.chunker.chunk(text, relative_path),
            _ => {
                tracing::debug!(path = relative_path, "binary file, no chunks");
                Vec::new()
            }
        };
        Ok((fingerprint, chunks))
    }

    async fn write_batch(
        &self,
        collection: &str,
        relative_path: &str,
        batch: &[CodeChunk],
        ids: &[String],
    ) -> Result<(), FileFailure> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let vectors = self
            .retry
            .run("embed", || self.embedder.embed(&texts))
            .await
            .and_then(|v| validate_batch(&v, texts.len(), self.embedder.dims()).map(|_| v))
            .map_err(|e| {
                tracing::warn!(path = relative_path, error = %e, "embedding failed");
                FileFailure::new(relative_path, FailureKind::Embedding, &e)
            })?;

        let docs: Vec<VectorDocument> = batch
            .iter()
            .zip(ids)
            .zip(vectors)
            .map(|((chunk, id), vector)| VectorDocument {
                id: id.clone(),
                vector,
                content: chunk.text.clone(),
                metadata: ChunkMetadata::for_chunk(relative_path, chunk),
            })
            .collect();

        self.retry
            .run("upsert", || self.store.upsert(collection, &docs))
            .await
            .map_err(|e| {
                tracing::warn!(path = relative_path, error = %e, "upsert failed");
                FileFailure::new(relative_path, FailureKind::Store, &e)
            })
    }

    /// Best-effort removal of ids written before a later batch failed.
    async fn rollback(&self, collection: &str, relative_path: &str, written: &[String]) {
        if written.is_empty() {
            return;
        }
        if let Err(e) = self
            .retry
            .run("rollback", || self.store.delete_by_ids(collection, written))
            .await
        {
            tracing::warn!(
                path = relative_path,
                orphans = written.len(),
                error = %e,
                "rollback of partially written chunks failed"
            );
        }
    }
}

/// Snapshot entry for a file whose old chunks were deleted but whose new
/// chunks were not written: prior fingerprint, no chunk ids.
fn stale_commit(relative_path: &str, prior: Option<&FileEntry>, deleted: usize) -> Option<FileCommit> {
    if deleted == 0 {
        return None;
    }
    prior.map(|p| FileCommit::Upsert {
        relative_path: relative_path.to_string(),
        entry: FileEntry {
            fingerprint: p.fingerprint.clone(),
            chunk_ids: Vec::new(),
        },
    })
}
