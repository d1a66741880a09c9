//! Diff engine: classify every path into added, modified, removed, or
//! unchanged.
//!
//! Pure functions, no I/O. A path is unchanged only when its content hash
//! and size both match; modification times are never consulted.

use std::collections::BTreeMap;

use crate::models::{FileFingerprint, SyncPlan};
use crate::scanner::ScanOutcome;

/// Compare a prior fingerprint map against a fresh scan.
pub fn diff(
    prior: &BTreeMap<String, FileFingerprint>,
    fresh: &BTreeMap<String, FileFingerprint>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (path, fp) in fresh {
        match prior.get(path) {
            None => {
                plan.added.insert(path.clone());
            }
            Some(old) if !old.same_content(fp) => {
                plan.modified.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    for path in prior.keys() {
        if !fresh.contains_key(path) {
            plan.removed.insert(path.clone());
        }
    }

    plan
}

/// Fingerprints to diff against, with unreadable paths pinned to their
/// prior state.
///
/// A file that was indexed before but could not be read during this scan
/// keeps its prior fingerprint, so it is treated as unchanged rather than
/// removed.
pub fn effective_fingerprints(
    prior: &BTreeMap<String, FileFingerprint>,
    scan: &ScanOutcome,
) -> BTreeMap<String, FileFingerprint> {
    let mut fresh = scan.fingerprints.clone();
    if scan.unreadable.is_empty() {
        return fresh;
    }
    for (path, fp) in prior {
        if !fresh.contains_key(path) && scan.is_unreadable(path) {
            fresh.insert(path.clone(), fp.clone());
        }
    }
    fresh
}
