use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use codesync::chunk::Chunker;
use codesync::embedding::{Embedder, HashEmbedder};
use codesync::error::{EmbeddingError, FailureKind, SnapshotError, SyncError};
use codesync::identity::CodebaseIdentity;
use codesync::ignore::IgnoreMatcher;
use codesync::models::{CodeChunk, FileCommit, Snapshot};
use codesync::orchestrator::{SyncOptions, SyncOrchestrator, SyncSettings, SyncStatus};
use codesync::pipeline::Pipeline;
use codesync::retry::RetryPolicy;
use codesync::snapshot::{SnapshotStore, SqliteSnapshotStore};
use codesync::store::memory::InMemoryVectorStore;
use codesync::store::{Filter, VectorStore};
use codesync::{db, migrate};

/// One chunk per blank-line separated paragraph.
struct ParagraphChunker;

impl Chunker for ParagraphChunker {
    fn chunk(&self, content: &str, _relative_path: &str) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut start = 0;
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                flush(&mut chunks, &mut current, start);
            } else {
                if current.is_empty() {
                    start = i;
                }
                current.push(line);
            }
        }
        flush(&mut chunks, &mut current, start);
        chunks
    }
}

fn flush(chunks: &mut Vec<CodeChunk>, current: &mut Vec<&str>, start: usize) {
    if current.is_empty() {
        return;
    }
    chunks.push(CodeChunk {
        text: current.join("\n"),
        start_line: start + 1,
        end_line: start + current.len() + 1,
    });
    current.clear();
}

/// Rejects any batch containing the marker text.
struct RejectingEmbedder {
    inner: HashEmbedder,
    marker: &'static str,
}

#[async_trait]
impl Embedder for RejectingEmbedder {
    fn model_name(&self) -> &str {
        "rejecting"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            return Err(EmbeddingError::Provider("content rejected".into()));
        }
        self.inner.embed(texts).await
    }
}

/// Never finishes embedding a batch containing the marker text.
struct StalledEmbedder {
    inner: HashEmbedder,
    marker: &'static str,
}

#[async_trait]
impl Embedder for StalledEmbedder {
    fn model_name(&self) -> &str {
        "stalled"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.embed(texts).await
    }
}

/// Snapshot store that stops persisting after a number of file commits,
/// and optionally cannot read snapshots at all.
struct CrashingSnapshots {
    inner: Arc<SqliteSnapshotStore>,
    commits_left: AtomicUsize,
    loads_fail: bool,
}

impl CrashingSnapshots {
    fn after_commits(inner: Arc<SqliteSnapshotStore>, commits: usize) -> Self {
        Self {
            inner,
            commits_left: AtomicUsize::new(commits),
            loads_fail: false,
        }
    }
}

#[async_trait]
impl SnapshotStore for CrashingSnapshots {
    async fn load(&self, identity: &str) -> Result<Option<Snapshot>, SnapshotError> {
        if self.loads_fail {
            return Err(SnapshotError::Corrupt {
                relative_path: "*".into(),
                reason: "unreadable page".into(),
            });
        }
        self.inner.load(identity).await
    }
    async fn create(&self, identity: &CodebaseIdentity) -> Result<Snapshot, SnapshotError> {
        self.inner.create(identity).await
    }
    async fn commit_file(
        &self,
        identity: &str,
        commit: &FileCommit,
    ) -> Result<u64, SnapshotError> {
        let left = self.commits_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(SnapshotError::Corrupt {
                relative_path: commit.relative_path().to_string(),
                reason: "disk full".into(),
            });
        }
        self.commits_left.store(left - 1, Ordering::SeqCst);
        self.inner.commit_file(identity, commit).await
    }
    async fn mark_started(&self, identity: &str, at: DateTime<Utc>) -> Result<(), SnapshotError> {
        self.inner.mark_started(identity, at).await
    }
    async fn mark_completed(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SnapshotError> {
        self.inner.mark_completed(identity, at).await
    }
    async fn delete(&self, identity: &str) -> Result<bool, SnapshotError> {
        self.inner.delete(identity).await
    }
}

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    store: Arc<InMemoryVectorStore>,
    snapshots: Arc<SqliteSnapshotStore>,
    orchestrator: SyncOrchestrator,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: false,
        call_timeout: Duration::from_secs(5),
    }
}

fn small_batches() -> SyncSettings {
    SyncSettings {
        batch_size: 1,
        concurrency: 1,
    }
}

impl Harness {
    async fn new() -> Self {
        Self::with_settings(SyncSettings::default()).await
    }

    async fn with_settings(settings: SyncSettings) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        let pool = db::connect_path(&tmp.path().join("data/snapshots.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let store = Arc::new(InMemoryVectorStore::new());
        let snapshots = Arc::new(SqliteSnapshotStore::new(pool));
        let orchestrator = build(
            snapshots.clone(),
            store.clone(),
            Arc::new(HashEmbedder::new(256)),
            settings,
            fast_retry(),
        );
        Harness {
            _tmp: tmp,
            root,
            store,
            snapshots,
            orchestrator,
        }
    }

    /// Another orchestrator over the same snapshot database and store.
    fn orchestrator_with(
        &self,
        snapshots: Arc<dyn SnapshotStore>,
        embedder: Arc<dyn Embedder>,
        settings: SyncSettings,
    ) -> SyncOrchestrator {
        build(snapshots, self.store.clone(), embedder, settings, fast_retry())
    }

    fn write(&self, path: &str, content: &str) {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    fn remove(&self, path: &str) {
        fs::remove_file(self.root.join(path)).unwrap();
    }

    fn identity(&self) -> CodebaseIdentity {
        CodebaseIdentity::resolve(&self.root).unwrap()
    }

    async fn snapshot(&self) -> Snapshot {
        self.snapshots
            .load(&self.identity().id)
            .await
            .unwrap()
            .expect("snapshot exists")
    }

    fn ids(&self) -> BTreeSet<String> {
        self.store
            .ids(&self.identity().collection)
            .into_iter()
            .collect()
    }

    async fn sync(&self) -> codesync::orchestrator::SyncReport {
        self.orchestrator
            .run_sync(&self.root, SyncOptions::default())
            .await
            .unwrap()
    }
}

fn build(
    snapshots: Arc<dyn SnapshotStore>,
    store: Arc<InMemoryVectorStore>,
    embedder: Arc<dyn Embedder>,
    settings: SyncSettings,
    retry: RetryPolicy,
) -> SyncOrchestrator {
    let pipeline = Pipeline::new(Arc::new(ParagraphChunker), embedder, store, retry)
        .with_embed_batch_size(2);
    SyncOrchestrator::new(
        snapshots,
        pipeline,
        Arc::new(IgnoreMatcher::with_defaults().unwrap()),
        settings,
    )
}

fn owned(snapshot: &Snapshot, path: &str) -> BTreeSet<String> {
    snapshot.chunk_ids(path).iter().cloned().collect()
}

#[tokio::test]
async fn test_two_file_scenario_swaps_only_the_edited_file() {
    let h = Harness::new().await;
    h.write("a.ts", "export const a = 1;\n\nexport const b = 2;\n");
    h.write("b.ts", "export function f() {}\n");

    let first = h.sync().await;
    assert_eq!(first.plan.added, 2);
    assert_eq!(first.chunks_written, 3);
    assert_eq!(h.store.count(&h.identity().collection).await.unwrap(), 3);

    let snap = h.snapshot().await;
    assert_eq!(snap.files.len(), 2);
    let old_a = owned(&snap, "a.ts");
    let b_ids = owned(&snap, "b.ts");
    assert_eq!(old_a.len(), 2);
    assert_eq!(b_ids.len(), 1);

    h.write(
        "a.ts",
        "export const a = 1;\n\nexport const b = 2;\n\nexport const c = 3;\n",
    );
    let plan = h.orchestrator.plan(&h.root).await.unwrap();
    assert_eq!(plan.modified, BTreeSet::from(["a.ts".to_string()]));
    assert!(plan.added.is_empty() && plan.removed.is_empty());

    let second = h.sync().await;
    assert_eq!(second.plan.modified, 1);
    assert_eq!(second.chunks_deleted, 2);
    assert_eq!(second.chunks_written, 3);
    assert_eq!(h.store.count(&h.identity().collection).await.unwrap(), 4);

    let snap = h.snapshot().await;
    let new_a = owned(&snap, "a.ts");
    assert_eq!(new_a.len(), 3);
    assert!(new_a.is_superset(&old_a));
    assert_eq!(owned(&snap, "b.ts"), b_ids);
    let all_owned: BTreeSet<String> = new_a.union(&b_ids).cloned().collect();
    assert_eq!(h.ids(), all_owned);

    let coll = h.identity().collection;
    let third_chunk = snap.chunk_ids("a.ts")[2].clone();
    let doc = h.store.get(&coll, &third_chunk).unwrap();
    assert_eq!(doc.content, "export const c = 3;");
    assert_eq!((doc.metadata.start_line, doc.metadata.end_line), (5, 6));
}

#[tokio::test]
async fn test_second_sync_without_changes_is_a_no_op() {
    let h = Harness::new().await;
    h.write("src/lib.rs", "pub mod a;\n\npub mod b;\n");
    h.write("src/a.rs", "pub fn a() {}\n");

    h.sync().await;
    let ids_before = h.ids();
    let generation_before = h.snapshot().await.generation;

    let again = h.sync().await;
    assert_eq!(again.plan.total(), 0);
    assert_eq!(again.processed, 0);
    assert_eq!(again.chunks_written, 0);
    assert_eq!(again.chunks_deleted, 0);
    assert_eq!(h.ids(), ids_before);
    assert_eq!(h.snapshot().await.generation, generation_before);
}

#[tokio::test]
async fn test_single_edit_plans_exactly_that_file() {
    let h = Harness::new().await;
    for i in 0..12 {
        h.write(&format!("pkg/mod{}.py", i), &format!("def f{}():\n    return {}\n", i, i));
    }
    h.sync().await;

    h.write("pkg/mod7.py", "def f7():\n    return 700\n");
    let plan = h.orchestrator.plan(&h.root).await.unwrap();
    assert_eq!(plan.modified, BTreeSet::from(["pkg/mod7.py".to_string()]));
    assert_eq!(plan.len(), 1);
}

#[tokio::test]
async fn test_removing_a_file_deletes_everything_it_owned() {
    let h = Harness::new().await;
    h.write("keep.go", "package main\n");
    h.write("drop.go", "package main\n\nfunc a() {}\n\nfunc b() {}\n");
    h.sync().await;
    let dropped = owned(&h.snapshot().await, "drop.go");
    assert_eq!(dropped.len(), 3);

    h.remove("drop.go");
    let report = h.sync().await;
    assert_eq!(report.plan.removed, 1);
    assert_eq!(report.chunks_deleted, 3);

    let snap = h.snapshot().await;
    assert!(!snap.files.contains_key("drop.go"));
    let present = h.ids();
    assert!(dropped.iter().all(|id| !present.contains(id)));
    assert_eq!(present.len(), 1);
}

#[tokio::test]
async fn test_interrupted_run_resumes_with_only_the_unfinished_file() {
    let h = Harness::with_settings(small_batches()).await;
    h.write("a.rs", "fn a() {}\n");
    h.write("b.rs", "fn b() {}\n");
    h.write("c.rs", "fn c() {}\n");

    let crashing = Arc::new(CrashingSnapshots::after_commits(h.snapshots.clone(), 2));
    let doomed = h.orchestrator_with(crashing, Arc::new(HashEmbedder::new(256)), small_batches());
    let err = doomed
        .run_sync(&h.root, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SnapshotPersist(_)));
    assert!(matches!(
        doomed.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::Failed { .. }
    ));

    // A fresh process only sees what was committed.
    assert!(matches!(
        h.orchestrator.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::Interrupted { processed: None, .. }
    ));
    let snap = h.snapshot().await;
    assert_eq!(
        snap.files.keys().cloned().collect::<Vec<_>>(),
        vec!["a.rs", "b.rs"]
    );

    let plan = h.orchestrator.plan(&h.root).await.unwrap();
    assert_eq!(plan.added, BTreeSet::from(["c.rs".to_string()]));
    assert_eq!(plan.len(), 1);

    let report = h.sync().await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.files, 3);
    assert_eq!(h.ids().len(), 3);
}

#[tokio::test]
async fn test_crash_then_edit_leaves_no_orphans() {
    let h = Harness::new().await;
    h.write("a.rs", "fn a() {}\n\nfn b() {}\n");

    // Chunks reach the store but the commit never lands.
    let crashing = Arc::new(CrashingSnapshots::after_commits(h.snapshots.clone(), 0));
    let doomed = h.orchestrator_with(
        crashing,
        Arc::new(HashEmbedder::new(256)),
        SyncSettings::default(),
    );
    let err = doomed
        .run_sync(&h.root, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SnapshotPersist(_)));
    assert_eq!(h.ids().len(), 2);

    h.write("a.rs", "fn a() { todo!() }\n");
    let report = h.sync().await;
    assert!(report.failures.is_empty());
    assert_eq!(report.chunks_deleted, 2);

    let snap = h.snapshot().await;
    let owned_a = owned(&snap, "a.rs");
    assert_eq!(owned_a.len(), 1);
    assert_eq!(h.ids(), owned_a);
}

#[tokio::test]
async fn test_unreadable_snapshot_is_a_load_error() {
    let h = Harness::new().await;
    h.write("a.rs", "fn a() {}\n");
    let broken = h.orchestrator_with(
        Arc::new(CrashingSnapshots {
            inner: h.snapshots.clone(),
            commits_left: AtomicUsize::new(usize::MAX),
            loads_fail: true,
        }),
        Arc::new(HashEmbedder::new(256)),
        SyncSettings::default(),
    );

    let err = broken.get_sync_status(&h.root).await.unwrap_err();
    assert!(matches!(err, SyncError::SnapshotLoad(_)), "got {:?}", err);
    let err = broken.plan(&h.root).await.unwrap_err();
    assert!(matches!(err, SyncError::SnapshotLoad(_)), "got {:?}", err);
    let err = broken
        .run_sync(&h.root, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SnapshotLoad(_)), "got {:?}", err);
    assert!(h.snapshots.load(&h.identity().id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_embedding_timeout_fails_only_that_file() {
    let h = Harness::new().await;
    h.write("good.ts", "const ok = true;\n");
    h.write("slow.ts", "const STALL = true;\n");

    let impatient = RetryPolicy {
        call_timeout: Duration::from_millis(50),
        ..fast_retry()
    };
    let stalled = build(
        h.snapshots.clone(),
        h.store.clone(),
        Arc::new(StalledEmbedder {
            inner: HashEmbedder::new(256),
            marker: "STALL",
        }),
        SyncSettings::default(),
        impatient,
    );
    let report = stalled
        .run_sync(&h.root, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].relative_path, "slow.ts");
    assert_eq!(report.failures[0].kind, FailureKind::Embedding);
    assert!(report.failures[0].message.contains("timed out"));
    assert!(matches!(
        stalled.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::CompletedWithFailures { .. }
    ));

    let snap = h.snapshot().await;
    assert!(snap.files.contains_key("good.ts"));
    assert!(!snap.files.contains_key("slow.ts"));
    assert_eq!(h.ids(), owned(&snap, "good.ts"));
}

#[tokio::test]
async fn test_failed_file_is_reported_and_retried_next_run() {
    let h = Harness::new().await;
    h.write("good.ts", "const ok = true;\n");
    h.write("bad.ts", "const BROKEN = true;\n");

    let picky = h.orchestrator_with(
        h.snapshots.clone(),
        Arc::new(RejectingEmbedder {
            inner: HashEmbedder::new(256),
            marker: "BROKEN",
        }),
        SyncSettings::default(),
    );
    let report = picky
        .run_sync(&h.root, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].relative_path, "bad.ts");
    assert_eq!(report.failures[0].kind, FailureKind::Embedding);
    assert!(matches!(
        picky.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::CompletedWithFailures { .. }
    ));
    assert!(!h.snapshot().await.files.contains_key("bad.ts"));

    let plan = h.orchestrator.plan(&h.root).await.unwrap();
    assert_eq!(plan.added, BTreeSet::from(["bad.ts".to_string()]));
    assert_eq!(plan.len(), 1);

    let report = h.sync().await;
    assert!(report.failures.is_empty());
    assert_eq!(report.files, 2);
}

#[tokio::test]
async fn test_second_run_for_same_codebase_is_rejected() {
    let h = Harness::new().await;
    h.write("main.rs", "fn main() {}\n");

    let handle = h
        .orchestrator
        .start_sync(&h.root, SyncOptions::default())
        .unwrap();
    let err = h
        .orchestrator
        .start_sync(&h.root, SyncOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::AlreadyRunning { .. }));
    let err = h.orchestrator.clear_index(&h.root).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning { .. }));
    assert!(h
        .orchestrator
        .get_sync_status(&h.root)
        .await
        .unwrap()
        .is_in_progress());

    handle.wait().await.unwrap();
    // The lock is released once the run ends.
    h.sync().await;
}

#[tokio::test]
async fn test_cancelled_run_is_interrupted_and_resumable() {
    let h = Harness::with_settings(small_batches()).await;
    h.write("one.rs", "fn one() {}\n");
    h.write("two.rs", "fn two() {}\n");

    let handle = h
        .orchestrator
        .start_sync(&h.root, SyncOptions::default())
        .unwrap();
    handle.cancel();
    let report = handle.wait().await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.processed, 0);
    assert_eq!(
        h.orchestrator.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::Interrupted {
            processed: Some(0),
            total: Some(2)
        }
    );
    assert!(h.snapshot().await.last_completed_at.is_none());

    let report = h.sync().await;
    assert!(!report.cancelled);
    assert_eq!(report.processed, 2);
    assert!(matches!(
        h.orchestrator.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::Completed { files: 2, .. }
    ));
}

#[tokio::test]
async fn test_missing_collection_triggers_full_reindex() {
    let h = Harness::new().await;
    h.write("x.ts", "let x = 1;\n");
    h.write("y.ts", "let y = 2;\n");
    h.sync().await;

    h.store
        .drop_collection(&h.identity().collection)
        .await
        .unwrap();
    let plan = h.orchestrator.plan(&h.root).await.unwrap();
    assert_eq!(plan.added.len(), 2);

    let report = h.sync().await;
    assert_eq!(report.plan.added, 2);
    assert_eq!(h.ids().len(), 2);
}

#[tokio::test]
async fn test_force_reindexes_everything() {
    let h = Harness::new().await;
    h.write("x.ts", "let x = 1;\n");
    h.sync().await;

    let report = h
        .orchestrator
        .run_sync(
            &h.root,
            SyncOptions {
                force: true,
                ..SyncOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.plan.added, 1);
    assert_eq!(h.ids().len(), 1);
}

#[tokio::test]
async fn test_changed_embedding_dimension_starts_over() {
    let h = Harness::new().await;
    h.write("x.ts", "let x = 1;\n");
    h.sync().await;

    let wider = h.orchestrator_with(
        h.snapshots.clone(),
        Arc::new(HashEmbedder::new(64)),
        SyncSettings::default(),
    );
    let report = wider
        .run_sync(&h.root, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.plan.added, 1);
    let coll = h.identity().collection;
    let id = h.ids().into_iter().next().unwrap();
    assert_eq!(h.store.get(&coll, &id).unwrap().vector.len(), 64);
}

#[tokio::test]
async fn test_clear_index_drops_collection_and_snapshot() {
    let h = Harness::new().await;
    h.write("x.ts", "let x = 1;\n");
    h.sync().await;

    assert!(h.orchestrator.clear_index(&h.root).await.unwrap());
    assert!(!h
        .store
        .has_collection(&h.identity().collection)
        .await
        .unwrap());
    assert!(h.snapshots.load(&h.identity().id).await.unwrap().is_none());
    assert_eq!(
        h.orchestrator.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::NotStarted
    );
    assert!(!h.orchestrator.clear_index(&h.root).await.unwrap());
}

#[tokio::test]
async fn test_status_moves_from_not_started_to_completed() {
    let h = Harness::new().await;
    assert_eq!(
        h.orchestrator.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::NotStarted
    );
    h.write("a.md", "# Title\n\nBody text.\n");
    h.sync().await;
    assert!(matches!(
        h.orchestrator.get_sync_status(&h.root).await.unwrap(),
        SyncStatus::Completed {
            files: 1,
            chunks: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn test_search_returns_matching_chunks() {
    let h = Harness::new().await;
    h.write("auth/login.ts", "function validatePassword(password) {}\n");
    h.write("db/query.ts", "function runQuery(sql) {}\n");
    h.write("docs/guide.md", "validatePassword is documented here\n");
    h.sync().await;

    let hits = h
        .orchestrator
        .search(&h.root, "validatePassword password", 3, None)
        .await
        .unwrap();
    assert_eq!(hits[0].metadata.relative_path, "auth/login.ts");

    let only_md = Filter::FileExtension("md".into());
    let hits = h
        .orchestrator
        .search(&h.root, "validatePassword", 3, Some(&only_md))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata.relative_path, "docs/guide.md");
}

#[tokio::test]
async fn test_ignored_paths_are_never_indexed() {
    let h = Harness::new().await;
    h.write("src/app.ts", "export {};\n");
    h.write("node_modules/dep/index.js", "module.exports = {};\n");
    h.write("assets/logo.png", "not really a png");
    let report = h.sync().await;
    assert_eq!(report.files, 1);
    assert!(h.snapshot().await.files.contains_key("src/app.ts"));
}

#[tokio::test]
async fn test_root_that_does_not_exist_is_a_scan_error() {
    let h = Harness::new().await;
    let missing = h.root.join("nope");
    let err = h
        .orchestrator
        .run_sync(Path::new(&missing), SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Scan(_)));
}
