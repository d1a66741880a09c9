//! Fingerprint scanner.
//!
//! Walks a codebase root and yields a [`FileFingerprint`] for every
//! non-ignored regular file. Traversal is depth-first in file-name order,
//! so two scans of an unchanged tree produce identical sequences.
//! Symlinks are never followed. Ignored directories are pruned before
//! they are read.
//!
//! File bytes are streamed through SHA-256 in fixed-size reads; the
//! scanner never holds a whole file in memory.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::error::{FileReadError, ScanError};
use crate::ignore::IgnorePredicate;
use crate::models::FileFingerprint;

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Start a lazy scan of `root`.
///
/// Fails with [`ScanError`] only when `root` itself cannot be read.
/// Unreadable files and subdirectories surface as `Err` items of the
/// returned iterator and do not end the scan.
pub fn scan<'a>(root: &Path, ignore: &'a dyn IgnorePredicate) -> Result<Scan<'a>, ScanError> {
    let meta = std::fs::metadata(root).map_err(|source| ScanError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    std::fs::read_dir(root).map_err(|source| ScanError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    Ok(Scan {
        root: root.to_path_buf(),
        walker,
        ignore,
    })
}

/// Lazy sequence of fingerprints produced by [`scan`].
pub struct Scan<'a> {
    root: PathBuf,
    walker: walkdir::IntoIter,
    ignore: &'a dyn IgnorePredicate,
}

impl Iterator for Scan<'_> {
    type Item = Result<FileFingerprint, FileReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let relative_path = err
                        .path()
                        .map(|p| relative_path(&self.root, p))
                        .unwrap_or_default();
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop"));
                    return Some(Err(FileReadError {
                        relative_path,
                        source,
                    }));
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            let rel = relative_path(&self.root, entry.path());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if self.ignore.is_ignored(&rel, true) {
                    self.walker.skip_current_dir();
                }
                continue;
            }
            if !file_type.is_file() || self.ignore.is_ignored(&rel, false) {
                continue;
            }

            return Some(fingerprint_entry(&entry, rel));
        }
    }
}

/// Result of draining a [`Scan`].
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub fingerprints: BTreeMap<String, FileFingerprint>,
    pub unreadable: Vec<FileReadError>,
}

impl ScanOutcome {
    /// True when `relative_path` is, or lies under, a path that could not be read.
    pub fn is_unreadable(&self, relative_path: &str) -> bool {
        self.unreadable.iter().any(|e| {
            e.relative_path.is_empty()
                || relative_path == e.relative_path
                || relative_path
                    .strip_prefix(e.relative_path.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Scan `root` to completion, collecting fingerprints and skipped paths.
pub fn scan_all(root: &Path, ignore: &dyn IgnorePredicate) -> Result<ScanOutcome, ScanError> {
    let mut outcome = ScanOutcome::default();
    for item in scan(root, ignore)? {
        match item {
            Ok(fp) => {
                outcome.fingerprints.insert(fp.relative_path.clone(), fp);
            }
            Err(err) => {
                tracing::warn!(path = %err.relative_path, error = %err.source, "skipping unreadable path");
                outcome.unreadable.push(err);
            }
        }
    }
    Ok(outcome)
}

/// Fingerprint an in-memory byte slice (used for content read after scanning).
pub fn fingerprint_bytes(relative_path: &str, bytes: &[u8], modified: i64) -> FileFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    FileFingerprint {
        relative_path: relative_path.to_string(),
        hash: hex::encode(hasher.finalize()),
        size: bytes.len() as u64,
        modified,
    }
}

fn fingerprint_entry(entry: &DirEntry, rel: String) -> Result<FileFingerprint, FileReadError> {
    let wrap = |source: io::Error| FileReadError {
        relative_path: rel.clone(),
        source,
    };

    let metadata = entry.metadata().map_err(|e| {
        wrap(
            e.into_io_error()
                .unwrap_or_else(|| io::Error::other("metadata unavailable")),
        )
    })?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let mut file = File::open(entry.path()).map_err(wrap)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(wrap)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(FileFingerprint {
        relative_path: rel,
        hash: hex::encode(hasher.finalize()),
        size,
        modified,
    })
}

/// `/`-separated path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
