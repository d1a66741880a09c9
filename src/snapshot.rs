//! Durable snapshot persistence.
//!
//! A [`Snapshot`] is stored as one row in `snapshots` plus one row per
//! indexed file in `snapshot_files`. It is never rewritten in bulk:
//! [`SnapshotStore::commit_file`] changes exactly one file's row and bumps
//! the generation inside a single transaction, so a crash loses at most
//! the file that was in flight.
//!
//! | Implementation | Persistence |
//! |----------------|-------------|
//! | [`SqliteSnapshotStore`] | SQLite (WAL) |
//! | [`MemorySnapshotStore`] | process lifetime |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::SnapshotError;
use crate::identity::CodebaseIdentity;
use crate::models::{FileCommit, FileEntry, FileFingerprint, Snapshot};

/// Durable store of [`Snapshot`]s keyed by codebase identity.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, identity: &str) -> Result<Option<Snapshot>, SnapshotError>;

    /// Create (or reset to) an empty snapshot bound to the identity's
    /// collection. A reset bumps the generation instead of restarting it.
    async fn create(&self, identity: &CodebaseIdentity) -> Result<Snapshot, SnapshotError>;

    /// Persist one file's mutation. Returns the new generation.
    async fn commit_file(&self, identity: &str, commit: &FileCommit)
        -> Result<u64, SnapshotError>;

    async fn mark_started(&self, identity: &str, at: DateTime<Utc>) -> Result<(), SnapshotError>;

    async fn mark_completed(&self, identity: &str, at: DateTime<Utc>)
        -> Result<(), SnapshotError>;

    /// Returns whether a snapshot existed.
    async fn delete(&self, identity: &str) -> Result<bool, SnapshotError>;
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// SQLite implementation of [`SnapshotStore`].
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self, identity: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let row = sqlx::query(
            "SELECT root, collection, generation, last_started_at, last_completed_at \
             FROM snapshots WHERE identity = ?",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let root: String = row.get("root");
        let generation: i64 = row.get("generation");
        let mut snapshot = Snapshot {
            identity: identity.to_string(),
            root: PathBuf::from(root),
            collection: row.get("collection"),
            files: Default::default(),
            generation: generation as u64,
            last_started_at: from_millis(row.get("last_started_at")),
            last_completed_at: from_millis(row.get("last_completed_at")),
        };

        let file_rows = sqlx::query(
            "SELECT relative_path, hash, size, modified, chunk_ids \
             FROM snapshot_files WHERE identity = ? ORDER BY relative_path",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;

        for row in &file_rows {
            let relative_path: String = row.get("relative_path");
            let chunk_ids_json: String = row.get("chunk_ids");
            let chunk_ids: Vec<String> =
                serde_json::from_str(&chunk_ids_json).map_err(|e| SnapshotError::Corrupt {
                    relative_path: relative_path.clone(),
                    reason: e.to_string(),
                })?;
            let size: i64 = row.get("size");
            let fingerprint = FileFingerprint {
                relative_path: relative_path.clone(),
                hash: row.get("hash"),
                size: size as u64,
                modified: row.get("modified"),
            };
            snapshot.files.insert(
                relative_path,
                FileEntry {
                    fingerprint,
                    chunk_ids,
                },
            );
        }

        Ok(Some(snapshot))
    }

    async fn create(&self, identity: &CodebaseIdentity) -> Result<Snapshot, SnapshotError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM snapshot_files WHERE identity = ?")
            .bind(&identity.id)
            .execute(&mut *tx)
            .await?;

        // A reset keeps counting from the previous generation.
        let generation: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO snapshots (identity, root, collection, generation, created_at,
                                   last_started_at, last_completed_at)
            VALUES (?, ?, ?, 0, ?, NULL, NULL)
            ON CONFLICT(identity) DO UPDATE SET
                root = excluded.root,
                collection = excluded.collection,
                generation = snapshots.generation + 1,
                created_at = excluded.created_at,
                last_started_at = NULL,
                last_completed_at = NULL
            RETURNING generation
            "#,
        )
        .bind(&identity.id)
        .bind(identity.root.to_string_lossy().to_string())
        .bind(&identity.collection)
        .bind(to_millis(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut snapshot = Snapshot::empty(&identity.id, &identity.root, &identity.collection);
        snapshot.generation = generation as u64;
        Ok(snapshot)
    }

    async fn commit_file(
        &self,
        identity: &str,
        commit: &FileCommit,
    ) -> Result<u64, SnapshotError> {
        let mut tx = self.pool.begin().await?;

        let generation: Option<i64> = sqlx::query_scalar(
            "UPDATE snapshots SET generation = generation + 1 WHERE identity = ? RETURNING generation",
        )
        .bind(identity)
        .fetch_optional(&mut *tx)
        .await?;
        let generation = generation.ok_or_else(|| SnapshotError::Missing(identity.to_string()))?;

        match commit {
            FileCommit::Upsert {
                relative_path,
                entry,
            } => {
                let chunk_ids = serde_json::to_string(&entry.chunk_ids).map_err(|e| {
                    SnapshotError::Corrupt {
                        relative_path: relative_path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                sqlx::query(
                    r#"
                    INSERT INTO snapshot_files (identity, relative_path, hash, size, modified, chunk_ids)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(identity, relative_path) DO UPDATE SET
                        hash = excluded.hash,
                        size = excluded.size,
                        modified = excluded.modified,
                        chunk_ids = excluded.chunk_ids
                    "#,
                )
                .bind(identity)
                .bind(relative_path)
                .bind(&entry.fingerprint.hash)
                .bind(entry.fingerprint.size as i64)
                .bind(entry.fingerprint.modified)
                .bind(chunk_ids)
                .execute(&mut *tx)
                .await?;
            }
            FileCommit::Remove { relative_path } => {
                sqlx::query("DELETE FROM snapshot_files WHERE identity = ? AND relative_path = ?")
                    .bind(identity)
                    .bind(relative_path)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(generation as u64)
    }

    async fn mark_started(&self, identity: &str, at: DateTime<Utc>) -> Result<(), SnapshotError> {
        let result = sqlx::query("UPDATE snapshots SET last_started_at = ? WHERE identity = ?")
            .bind(to_millis(at))
            .bind(identity)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SnapshotError::Missing(identity.to_string()));
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SnapshotError> {
        let result = sqlx::query("UPDATE snapshots SET last_completed_at = ? WHERE identity = ?")
            .bind(to_millis(at))
            .bind(identity)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SnapshotError::Missing(identity.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<bool, SnapshotError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM snapshot_files WHERE identity = ?")
            .bind(identity)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM snapshots WHERE identity = ?")
            .bind(identity)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory [`SnapshotStore`], for tests and the `memory` backend.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, Snapshot>) -> T) -> T {
        let mut guard = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, identity: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.with(|m| m.get(identity).cloned()))
    }

    async fn create(&self, identity: &CodebaseIdentity) -> Result<Snapshot, SnapshotError> {
        let mut snapshot = Snapshot::empty(&identity.id, &identity.root, &identity.collection);
        Ok(self.with(|m| {
            if let Some(previous) = m.get(&identity.id) {
                snapshot.generation = previous.generation + 1;
            }
            m.insert(identity.id.clone(), snapshot.clone());
            snapshot
        }))
    }

    async fn commit_file(
        &self,
        identity: &str,
        commit: &FileCommit,
    ) -> Result<u64, SnapshotError> {
        self.with(|m| {
            let snapshot = m
                .get_mut(identity)
                .ok_or_else(|| SnapshotError::Missing(identity.to_string()))?;
            snapshot.apply(commit);
            Ok(snapshot.generation)
        })
    }

    async fn mark_started(&self, identity: &str, at: DateTime<Utc>) -> Result<(), SnapshotError> {
        self.with(|m| match m.get_mut(identity) {
            Some(s) => {
                s.last_started_at = Some(at);
                Ok(())
            }
            None => Err(SnapshotError::Missing(identity.to_string())),
        })
    }

    async fn mark_completed(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SnapshotError> {
        self.with(|m| match m.get_mut(identity) {
            Some(s) => {
                s.last_completed_at = Some(at);
                Ok(())
            }
            None => Err(SnapshotError::Missing(identity.to_string())),
        })
    }

    async fn delete(&self, identity: &str) -> Result<bool, SnapshotError> {
        Ok(self.with(|m| m.remove(identity).is_some()))
    }
}
