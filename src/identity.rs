//! Codebase identity.
//!
//! A codebase is identified by the SHA-256 of its canonical absolute root
//! path. The identity keys the snapshot and names the vector-store
//! collection the codebase is bound to.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::ScanError;

/// Prefix of every collection name created by codesync.
pub const COLLECTION_PREFIX: &str = "code_chunks_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodebaseIdentity {
    /// Canonical absolute root.
    pub root: PathBuf,
    /// Hex SHA-256 of the canonical root.
    pub id: String,
    pub collection: String,
}

impl CodebaseIdentity {
    /// Resolve `root` (following symlinks and `..`) and derive its identity.
    pub fn resolve(root: &Path) -> Result<Self, ScanError> {
        let canonical = root
            .canonicalize()
            .map_err(|source| ScanError::RootUnreadable {
                path: root.to_path_buf(),
                source,
            })?;
        if !canonical.is_dir() {
            return Err(ScanError::NotADirectory(canonical));
        }
        Ok(Self::from_canonical(canonical))
    }

    /// Derive the identity of an already-canonical root.
    pub fn from_canonical(root: PathBuf) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(root.to_string_lossy().as_bytes());
        let id = hex::encode(hasher.finalize());
        let collection = format!("{}{}", COLLECTION_PREFIX, &id[..16]);
        Self {
            root,
            id,
            collection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_is_stable_across_spellings() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("repo/src")).unwrap();
        let direct = CodebaseIdentity::resolve(&tmp.path().join("repo")).unwrap();
        let dotted = CodebaseIdentity::resolve(&tmp.path().join("repo/src/..")).unwrap();
        assert_eq!(direct, dotted);
        assert!(direct.collection.starts_with(COLLECTION_PREFIX));
        assert_eq!(direct.id.len(), 64);
    }

    #[test]
    fn test_different_roots_get_different_collections() {
        let a = CodebaseIdentity::from_canonical(PathBuf::from("/work/a"));
        let b = CodebaseIdentity::from_canonical(PathBuf::from("/work/b"));
        assert_ne!(a.id, b.id);
        assert_ne!(a.collection, b.collection);
    }

    #[test]
    fn test_missing_root_is_a_scan_error() {
        let tmp = TempDir::new().unwrap();
        let err = CodebaseIdentity::resolve(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, ScanError::RootUnreadable { .. }));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        let err = CodebaseIdentity::resolve(&file).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }
}
