//! Core data models used throughout codesync.
//!
//! These types describe what a codebase looks like on disk
//! ([`FileFingerprint`]), what the vector index currently holds for it
//! ([`Snapshot`], [`FileEntry`], [`ChunkRecord`]), and what has to change
//! between the two ([`SyncPlan`]).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content fingerprint of a single file, keyed by its path relative to the
/// codebase root (always `/`-separated).
///
/// Two fingerprints are equal iff their content hash and byte size match.
/// `modified` is recorded for diagnostics only and never participates in
/// equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub relative_path: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub hash: String,
    pub size: u64,
    /// Last-modified time, milliseconds since the Unix epoch.
    pub modified: i64,
}

impl FileFingerprint {
    /// True when both fingerprints describe the same bytes.
    pub fn same_content(&self, other: &FileFingerprint) -> bool {
        self.size == other.size && self.hash == other.hash
    }
}

impl PartialEq for FileFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.same_content(other)
    }
}

impl Eq for FileFingerprint {}

/// A chunk written to the vector store on behalf of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub relative_path: String,
    /// First line of the chunk, 1-based, inclusive.
    pub start_line: usize,
    /// Line after the last line of the chunk, 1-based, exclusive.
    pub end_line: usize,
    pub collection: String,
}

/// A piece of file content produced by a [`Chunker`](crate::chunk::Chunker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    pub text: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, exclusive.
    pub end_line: usize,
}

/// Metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Extension without the leading dot, empty when the file has none.
    pub file_extension: String,
}

impl ChunkMetadata {
    pub fn for_chunk(relative_path: &str, chunk: &CodeChunk) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            file_extension: file_extension(relative_path),
        }
    }
}

/// Extension of a relative path without the dot (`"src/a.ts"` → `"ts"`).
pub fn file_extension(relative_path: &str) -> String {
    Path::new(relative_path)
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// What the snapshot records for one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub fingerprint: FileFingerprint,
    /// Ids of the chunks this file owns, in chunk order.
    pub chunk_ids: Vec<String>,
}

/// A single-file mutation of a [`Snapshot`].
///
/// Snapshots are only ever changed one file at a time so that partial
/// progress of a run survives a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCommit {
    /// Record (or replace) the entry for a path.
    Upsert { relative_path: String, entry: FileEntry },
    /// Forget a path entirely.
    Remove { relative_path: String },
}

impl FileCommit {
    pub fn relative_path(&self) -> &str {
        match self {
            FileCommit::Upsert { relative_path, .. } | FileCommit::Remove { relative_path } => {
                relative_path
            }
        }
    }
}

/// Last successfully synchronized state of one codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stable codebase identity (see [`crate::identity`]).
    pub identity: String,
    pub root: PathBuf,
    /// Vector-store collection this codebase is bound to.
    pub collection: String,
    pub files: BTreeMap<String, FileEntry>,
    /// Incremented on every committed file mutation.
    pub generation: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// A fresh, empty snapshot bound to `collection`.
    pub fn empty(identity: &str, root: &Path, collection: &str) -> Self {
        Self {
            identity: identity.to_string(),
            root: root.to_path_buf(),
            collection: collection.to_string(),
            files: BTreeMap::new(),
            generation: 0,
            last_started_at: None,
            last_completed_at: None,
        }
    }

    /// Path → fingerprint view consumed by the diff engine.
    pub fn fingerprints(&self) -> BTreeMap<String, FileFingerprint> {
        self.files
            .iter()
            .map(|(path, entry)| (path.clone(), entry.fingerprint.clone()))
            .collect()
    }

    pub fn chunk_ids(&self, relative_path: &str) -> &[String] {
        self.files
            .get(relative_path)
            .map(|e| e.chunk_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn chunk_count(&self) -> usize {
        self.files.values().map(|e| e.chunk_ids.len()).sum()
    }

    /// Apply one committed file mutation and bump the generation.
    pub fn apply(&mut self, commit: &FileCommit) {
        match commit {
            FileCommit::Upsert {
                relative_path,
                entry,
            } => {
                self.files.insert(relative_path.clone(), entry.clone());
            }
            FileCommit::Remove { relative_path } => {
                self.files.remove(relative_path);
            }
        }
        self.generation += 1;
    }
}

/// Classification of the paths that differ between a snapshot and a scan.
///
/// The three sets are pairwise disjoint. Unchanged paths appear in none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Number of paths that need work.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Added and modified paths, in path order.
    pub fn files_to_index(&self) -> Vec<String> {
        self.added.union(&self.modified).cloned().collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            added: self.added.len(),
            modified: self.modified.len(),
            removed: self.removed.len(),
        }
    }
}

/// Counts of a [`SyncPlan`], cheap to copy into reports and status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.added + self.modified + self.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(path: &str, hash: &str, size: u64, modified: i64) -> FileFingerprint {
        FileFingerprint {
            relative_path: path.to_string(),
            hash: hash.to_string(),
            size,
            modified,
        }
    }

    #[test]
    fn test_fingerprint_equality_ignores_mtime() {
        assert_eq!(fp("a.rs", "abc", 3, 1), fp("a.rs", "abc", 3, 999));
        assert_ne!(fp("a.rs", "abc", 3, 1), fp("a.rs", "abd", 3, 1));
        assert_ne!(fp("a.rs", "abc", 3, 1), fp("a.rs", "abc", 4, 1));
    }

    #[test]
    fn test_snapshot_apply_bumps_generation() {
        let mut snap = Snapshot::empty("id", Path::new("/tmp/x"), "code_chunks_x");
        snap.apply(&FileCommit::Upsert {
            relative_path: "a.rs".into(),
            entry: FileEntry {
                fingerprint: fp("a.rs", "h", 1, 0),
                chunk_ids: vec!["c1".into(), "c2".into()],
            },
        });
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.chunk_ids("a.rs"), ["c1", "c2"]);
        assert_eq!(snap.chunk_count(), 2);

        snap.apply(&FileCommit::Remove {
            relative_path: "a.rs".into(),
        });
        assert_eq!(snap.generation, 2);
        assert!(snap.files.is_empty());
        assert!(snap.chunk_ids("a.rs").is_empty());
    }

    #[test]
    fn test_file_extension_without_dot() {
        assert_eq!(file_extension("src/lib.rs"), "rs");
        assert_eq!(file_extension("Makefile"), "");
        assert_eq!(file_extension("a/b.test.ts"), "ts");
    }

    #[test]
    fn test_files_to_index_merges_added_and_modified() {
        let mut plan = SyncPlan::default();
        plan.added.insert("b.rs".into());
        plan.modified.insert("a.rs".into());
        plan.removed.insert("c.rs".into());
        assert_eq!(plan.files_to_index(), vec!["a.rs", "b.rs"]);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.summary().total(), 3);
    }
}
