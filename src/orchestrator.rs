//! Sync orchestrator: one codebase run from scan to committed snapshot.
//!
//! A run moves through `Idle → Scanning → Diffing → Reconciling →
//! Completed`, or ends `Interrupted` when cancelled. Resuming is simply
//! running again: the codebase is re-scanned and re-diffed against the
//! snapshot, which already holds every file committed before the
//! interruption.
//!
//! # Guarantees
//!
//! - At most one run per codebase identity. A second request while one is
//!   active fails with [`SyncError::AlreadyRunning`].
//! - Files are reconciled in batches of `batch_size` with at most
//!   `concurrency` in flight. Cancellation is honored between batches;
//!   files already in flight finish.
//! - Each file's outcome is committed to the [`SnapshotStore`] on its own,
//!   as soon as it completes.
//! - The plan is fixed when the run starts. Files appearing mid-run are
//!   picked up by the next run.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chunk::LineChunker;
use crate::config::{Config, SyncConfig};
use crate::diff::{diff, effective_fingerprints};
use crate::embedding::create_embedder;
use crate::error::{FileFailure, StoreError, SyncError};
use crate::identity::CodebaseIdentity;
use crate::ignore::{IgnoreMatcher, IgnorePredicate};
use crate::models::{PlanSummary, Snapshot, SyncPlan};
use crate::pipeline::{FileAction, FileOutcome, FileTask, Pipeline};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::retry::RetryPolicy;
use crate::scanner::{scan_all, ScanOutcome};
use crate::snapshot::{SnapshotStore, SqliteSnapshotStore};
use crate::store::{create_store, Filter, SearchHit};
use crate::{db, migrate};

/// Batching and concurrency limits for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Files per batch. Cancellation is checked between batches.
    pub batch_size: usize,
    /// Files reconciled concurrently within a batch.
    pub concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            concurrency: 4,
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }
}

/// Per-request options.
#[derive(Clone)]
pub struct SyncOptions {
    /// Drop the collection and snapshot first and index everything again.
    pub force: bool,
    pub progress: Arc<dyn SyncProgressReporter>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            progress: Arc::new(NoProgress),
        }
    }
}

/// Where an active run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Scanning,
    Diffing,
    Reconciling,
}

/// Queryable state of a codebase's index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    NotStarted,
    InProgress {
        phase: RunPhase,
        processed: usize,
        total: usize,
    },
    Completed {
        completed_at: Option<DateTime<Utc>>,
        files: usize,
        chunks: usize,
    },
    CompletedWithFailures {
        completed_at: Option<DateTime<Utc>>,
        files: usize,
        chunks: usize,
        failures: Vec<FileFailure>,
    },
    Failed {
        error: String,
        failures: Vec<FileFailure>,
    },
    /// A run stopped before finishing its plan. Counts are known only for
    /// runs observed by this process.
    Interrupted {
        #[serde(skip_serializing_if = "Option::is_none")]
        processed: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
}

impl SyncStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SyncStatus::InProgress { .. })
    }

    /// Status of a codebase with no run observed by this process.
    fn from_snapshot(snapshot: Option<&Snapshot>) -> Self {
        let Some(s) = snapshot else {
            return SyncStatus::NotStarted;
        };
        match (s.last_started_at, s.last_completed_at) {
            (started, Some(done)) if started.map_or(true, |st| st <= done) => {
                SyncStatus::Completed {
                    completed_at: Some(done),
                    files: s.files.len(),
                    chunks: s.chunk_count(),
                }
            }
            (None, None) if s.files.is_empty() => SyncStatus::NotStarted,
            _ => SyncStatus::Interrupted {
                processed: None,
                total: None,
            },
        }
    }
}

/// Summary of a finished (or cancelled) run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub identity: String,
    pub root: PathBuf,
    pub collection: String,
    pub plan: PlanSummary,
    /// Planned files whose reconciliation finished, failed or not.
    pub processed: usize,
    pub chunks_written: usize,
    pub chunks_deleted: usize,
    /// Per-file failures, including paths the scan could not read.
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
    /// Snapshot generation after the last commit of this run.
    pub generation: u64,
    /// Files and chunks recorded in the snapshot at the end of the run.
    pub files: usize,
    pub chunks: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn status(&self) -> SyncStatus {
        if self.cancelled {
            SyncStatus::Interrupted {
                processed: Some(self.processed),
                total: Some(self.plan.total()),
            }
        } else if self.failures.is_empty() {
            SyncStatus::Completed {
                completed_at: Some(self.finished_at),
                files: self.files,
                chunks: self.chunks,
            }
        } else {
            SyncStatus::CompletedWithFailures {
                completed_at: Some(self.finished_at),
                files: self.files,
                chunks: self.chunks,
                failures: self.failures.clone(),
            }
        }
    }
}

/// Handle to a run started with [`SyncOrchestrator::start_sync`].
pub struct SyncHandle {
    run_id: Uuid,
    identity: CodebaseIdentity,
    cancel: CancellationToken,
    join: JoinHandle<Result<SyncReport, SyncError>>,
}

impl SyncHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn identity(&self) -> &CodebaseIdentity {
        &self.identity
    }

    /// Request cancellation. The run stops before its next batch.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<SyncReport, SyncError> {
        self.join
            .await
            .map_err(|e| SyncError::Join(e.to_string()))?
    }
}

struct RunRecord {
    run_id: Uuid,
    active: bool,
    status: SyncStatus,
}

struct Inner {
    snapshots: Arc<dyn SnapshotStore>,
    pipeline: Pipeline,
    ignore: Arc<dyn IgnorePredicate>,
    settings: SyncSettings,
    runs: Mutex<HashMap<String, RunRecord>>,
}

/// Releases the per-identity lock when the run ends, however it ends.
struct RunGuard {
    inner: Arc<Inner>,
    identity: String,
    run_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut runs = self.inner.runs();
        if let Some(record) = runs.get_mut(&self.identity) {
            if record.run_id == self.run_id && record.active {
                record.active = false;
                if let SyncStatus::InProgress {
                    processed, total, ..
                } = record.status
                {
                    record.status = SyncStatus::Interrupted {
                        processed: Some(processed),
                        total: Some(total),
                    };
                }
            }
        }
    }
}

/// Coordinates scanner, diff engine, pipeline and snapshot store.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        pipeline: Pipeline,
        ignore: Arc<dyn IgnorePredicate>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                snapshots,
                pipeline,
                ignore,
                settings,
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Build an orchestrator from configuration: SQLite snapshot store,
    /// the configured vector backend, embedder, chunker and retry policy.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let store = create_store(config.store.kind()?, &pool);
        let embedder = create_embedder(&config.embedding)?;
        let chunker = Arc::new(LineChunker::new(
            config.chunking.max_lines,
            config.chunking.overlap_lines,
        ));
        let retry = RetryPolicy::from_config(
            &config.retry,
            Duration::from_secs(config.embedding.timeout_secs),
        );
        let pipeline = Pipeline::new(chunker, embedder, store, retry)
            .with_embed_batch_size(config.embedding.batch_size)
            .with_max_file_bytes(config.sync.max_file_bytes);
        let ignore = Arc::new(IgnoreMatcher::new(
            &config.sync.include_globs,
            &config.sync.exclude_globs,
        )?);

        Ok(Self::new(
            Arc::new(SqliteSnapshotStore::new(pool)),
            pipeline,
            ignore,
            SyncSettings::from_config(&config.sync),
        ))
    }

    /// Start a run in the background. Must be called within a Tokio runtime.
    pub fn start_sync(&self, root: &Path, options: SyncOptions) -> Result<SyncHandle, SyncError> {
        let identity = CodebaseIdentity::resolve(root)?;
        let run_id = Uuid::new_v4();
        let guard = self.inner.begin(&identity, run_id)?;
        let cancel = CancellationToken::new();

        tracing::info!(
            identity = %identity.id,
            root = %identity.root.display(),
            run_id = %run_id,
            "sync started"
        );

        let inner = Arc::clone(&self.inner);
        let run_identity = identity.clone();
        let run_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let mut failures = Vec::new();
            let result = inner
                .execute(&run_identity, &options, &run_cancel, run_id, &mut failures)
                .await;
            let status = match &result {
                Ok(report) => report.status(),
                Err(e) => {
                    tracing::error!(identity = %run_identity.id, error = %e, "sync failed");
                    SyncStatus::Failed {
                        error: e.to_string(),
                        failures,
                    }
                }
            };
            inner.set_status(&run_identity.id, run_id, status);
            drop(guard);
            result
        });

        Ok(SyncHandle {
            run_id,
            identity,
            cancel,
            join,
        })
    }

    /// Run a sync to completion.
    pub async fn run_sync(&self, root: &Path, options: SyncOptions) -> Result<SyncReport, SyncError> {
        self.start_sync(root, options)?.wait().await
    }

    /// Current status of `root`: the run this process knows about, or the
    /// state recorded in the snapshot.
    pub async fn get_sync_status(&self, root: &Path) -> Result<SyncStatus, SyncError> {
        let identity = CodebaseIdentity::resolve(root)?;
        if let Some(status) = self.inner.status(&identity.id) {
            return Ok(status);
        }
        let snapshot = self
            .inner
            .snapshots
            .load(&identity.id)
            .await
            .map_err(SyncError::SnapshotLoad)?;
        Ok(SyncStatus::from_snapshot(snapshot.as_ref()))
    }

    /// Drop the collection and the snapshot of `root`. The collection goes
    /// first: if that fails nothing has changed, and a snapshot left behind
    /// by a later failure is discarded by the next run because its
    /// collection is gone. Returns whether anything existed.
    pub async fn clear_index(&self, root: &Path) -> Result<bool, SyncError> {
        let identity = CodebaseIdentity::resolve(root)?;
        let guard = self.inner.begin(&identity, Uuid::new_v4())?;
        let result = self.inner.clear(&identity).await;
        self.inner.forget(&identity.id);
        drop(guard);
        result
    }

    /// Scan and diff without touching the store or the snapshot.
    pub async fn plan(&self, root: &Path) -> Result<SyncPlan, SyncError> {
        let identity = CodebaseIdentity::resolve(root)?;
        let mut prior = BTreeMap::new();
        let loaded = self
            .inner
            .snapshots
            .load(&identity.id)
            .await
            .map_err(SyncError::SnapshotLoad)?;
        if let Some(snapshot) = loaded {
            if self
                .inner
                .pipeline
                .store()
                .has_collection(&snapshot.collection)
                .await?
            {
                prior = snapshot.fingerprints();
            }
        }
        let scan = self.inner.scan(identity.root.clone()).await?;
        Ok(diff(&prior, &effective_fingerprints(&prior, &scan)))
    }

    /// Similarity search over the indexed chunks of `root`.
    pub async fn search(
        &self,
        root: &Path,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, SyncError> {
        let identity = CodebaseIdentity::resolve(root)?;
        let collection = self
            .inner
            .snapshots
            .load(&identity.id)
            .await
            .map_err(SyncError::SnapshotLoad)?
            .map(|s| s.collection)
            .unwrap_or_else(|| identity.collection.clone());

        let store = self.inner.pipeline.store();
        if !store.has_collection(&collection).await? {
            return Ok(Vec::new());
        }
        let vector = self.inner.pipeline.embed_query(query).await?;
        Ok(store.search(&collection, &vector, limit, filter).await?)
    }
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunRecord>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the per-identity lock.
    fn begin(self: &Arc<Self>, identity: &CodebaseIdentity, run_id: Uuid) -> Result<RunGuard, SyncError> {
        let mut runs = self.runs();
        if runs.get(&identity.id).is_some_and(|r| r.active) {
            return Err(SyncError::AlreadyRunning {
                root: identity.root.clone(),
            });
        }
        runs.insert(
            identity.id.clone(),
            RunRecord {
                run_id,
                active: true,
                status: SyncStatus::InProgress {
                    phase: RunPhase::Idle,
                    processed: 0,
                    total: 0,
                },
            },
        );
        Ok(RunGuard {
            inner: Arc::clone(self),
            identity: identity.id.clone(),
            run_id,
        })
    }

    fn status(&self, identity: &str) -> Option<SyncStatus> {
        self.runs().get(identity).map(|r| r.status.clone())
    }

    fn set_status(&self, identity: &str, run_id: Uuid, status: SyncStatus) {
        if let Some(record) = self.runs().get_mut(identity) {
            if record.run_id == run_id {
                record.status = status;
            }
        }
    }

    fn set_progress(&self, identity: &str, run_id: Uuid, phase: RunPhase, processed: usize, total: usize) {
        self.set_status(
            identity,
            run_id,
            SyncStatus::InProgress {
                phase,
                processed,
                total,
            },
        );
    }

    fn forget(&self, identity: &str) {
        self.runs().remove(identity);
    }

    async fn clear(&self, identity: &CodebaseIdentity) -> Result<bool, SyncError> {
        let store = self.pipeline.store();
        let snapshot = self
            .snapshots
            .load(&identity.id)
            .await
            .map_err(SyncError::SnapshotLoad)?;
        let mut collections = vec![identity.collection.clone()];
        if let Some(s) = &snapshot {
            if s.collection != identity.collection {
                collections.push(s.collection.clone());
            }
        }

        let mut existed = false;
        for collection in &collections {
            if store.has_collection(collection).await? {
                existed = true;
                store.drop_collection(collection).await?;
            }
        }
        existed |= self
            .snapshots
            .delete(&identity.id)
            .await
            .map_err(SyncError::SnapshotPersist)?;

        tracing::info!(identity = %identity.id, existed, "index cleared");
        Ok(existed)
    }

    async fn scan(&self, root: PathBuf) -> Result<ScanOutcome, SyncError> {
        let ignore = Arc::clone(&self.ignore);
        tokio::task::spawn_blocking(move || scan_all(&root, ignore.as_ref()))
            .await
            .map_err(|e| SyncError::Join(e.to_string()))?
            .map_err(SyncError::from)
    }

    /// Load the snapshot bound to a live collection, or start a fresh one.
    async fn prepare(&self, identity: &CodebaseIdentity, force: bool) -> Result<Snapshot, SyncError> {
        let store = self.pipeline.store();
        let dims = self.pipeline.embedder().dims();
        let setup = |source: StoreError| SyncError::CollectionSetup {
            collection: identity.collection.clone(),
            source,
        };

        let mut loaded = self
            .snapshots
            .load(&identity.id)
            .await
            .map_err(SyncError::SnapshotLoad)?;
        if force {
            if let Some(s) = &loaded {
                if s.collection != identity.collection {
                    store.drop_collection(&s.collection).await.map_err(setup)?;
                }
            }
            store
                .drop_collection(&identity.collection)
                .await
                .map_err(setup)?;
            loaded = None;
        }

        let exists = store
            .has_collection(&identity.collection)
            .await
            .map_err(setup)?;
        let reusable = match loaded {
            Some(s) if exists && s.collection == identity.collection => Some(s),
            Some(_) => {
                tracing::warn!(
                    identity = %identity.id,
                    collection = %identity.collection,
                    "bound collection is missing, reindexing from scratch"
                );
                None
            }
            None => {
                if exists {
                    tracing::warn!(
                        collection = %identity.collection,
                        "collection has no snapshot, dropping it"
                    );
                    store
                        .drop_collection(&identity.collection)
                        .await
                        .map_err(setup)?;
                }
                None
            }
        };
        let snapshot = match reusable {
            Some(s) => s,
            None => self
                .snapshots
                .create(identity)
                .await
                .map_err(SyncError::SnapshotPersist)?,
        };

        match store.create_collection(&identity.collection, dims).await {
            Ok(()) => Ok(snapshot),
            Err(StoreError::DimensionMismatch {
                expected, actual, ..
            }) => {
                tracing::warn!(
                    collection = %identity.collection,
                    expected,
                    actual,
                    "embedding dimension changed, reindexing from scratch"
                );
                store
                    .drop_collection(&identity.collection)
                    .await
                    .map_err(setup)?;
                let fresh = self
                    .snapshots
                    .create(identity)
                    .await
                    .map_err(SyncError::SnapshotPersist)?;
                store
                    .create_collection(&identity.collection, dims)
                    .await
                    .map_err(setup)?;
                Ok(fresh)
            }
            Err(e) => Err(setup(e)),
        }
    }

    async fn execute(
        &self,
        identity: &CodebaseIdentity,
        options: &SyncOptions,
        cancel: &CancellationToken,
        run_id: Uuid,
        failures: &mut Vec<FileFailure>,
    ) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let root = identity.root.display().to_string();
        let collection = identity.collection.as_str();

        self.set_progress(&identity.id, run_id, RunPhase::Scanning, 0, 0);
        options
            .progress
            .report(SyncProgressEvent::Scanning { root: root.clone() });

        let mut snapshot = self.prepare(identity, options.force).await?;
        self.snapshots
            .mark_started(&identity.id, started_at)
            .await
            .map_err(SyncError::SnapshotPersist)?;
        snapshot.last_started_at = Some(started_at);

        let scan = self.scan(identity.root.clone()).await?;
        failures.extend(scan.unreadable.iter().map(FileFailure::from));

        self.set_progress(&identity.id, run_id, RunPhase::Diffing, 0, 0);
        let prior = snapshot.fingerprints();
        let plan = diff(&prior, &effective_fingerprints(&prior, &scan));
        let summary = plan.summary();
        tracing::info!(
            identity = %identity.id,
            added = summary.added,
            modified = summary.modified,
            removed = summary.removed,
            "sync planned"
        );
        options.progress.report(SyncProgressEvent::Planned {
            root: root.clone(),
            plan: summary,
        });

        let tasks = build_tasks(&plan, &snapshot);
        let total = tasks.len();
        self.set_progress(&identity.id, run_id, RunPhase::Reconciling, 0, total);

        let mut processed = 0usize;
        let mut chunks_written = 0usize;
        let mut chunks_deleted = 0usize;
        let mut cancelled = false;

        for batch in tasks.chunks(self.settings.batch_size.max(1)) {
            if cancel.is_cancelled() {
                tracing::info!(identity = %identity.id, processed, total, "sync cancelled");
                cancelled = true;
                break;
            }

            let mut outcomes = futures::stream::iter(batch.iter().cloned())
                .map(|task| self.pipeline.reconcile(&identity.root, collection, task))
                .buffer_unordered(self.settings.concurrency.max(1));

            let mut persist_error = None;
            while let Some(outcome) = outcomes.next().await {
                processed += 1;
                match &outcome {
                    FileOutcome::Indexed {
                        chunks, deleted, ..
                    } => {
                        chunks_written += chunks.len();
                        chunks_deleted += deleted;
                    }
                    FileOutcome::Removed { deleted, .. } => chunks_deleted += deleted,
                    FileOutcome::Failed { failure, .. } => failures.push(failure.clone()),
                }

                // After a persist failure the rest of the batch drains uncommitted.
                if persist_error.is_none() {
                    if let Some(commit) = outcome.commit() {
                        match self.snapshots.commit_file(&identity.id, commit).await {
                            Ok(generation) => {
                                snapshot.apply(commit);
                                snapshot.generation = generation;
                            }
                            Err(e) => {
                                tracing::error!(
                                    identity = %identity.id,
                                    path = %commit.relative_path(),
                                    error = %e,
                                    "snapshot commit failed"
                                );
                                persist_error = Some(e);
                            }
                        }
                    }
                }

                self.set_progress(&identity.id, run_id, RunPhase::Reconciling, processed, total);
                options.progress.report(SyncProgressEvent::Reconciling {
                    root: root.clone(),
                    n: processed as u64,
                    total: total as u64,
                });
            }

            if let Some(e) = persist_error {
                return Err(SyncError::SnapshotPersist(e));
            }
        }

        let finished_at = Utc::now();
        if !cancelled {
            self.snapshots
                .mark_completed(&identity.id, finished_at)
                .await
                .map_err(SyncError::SnapshotPersist)?;
            snapshot.last_completed_at = Some(finished_at);
        }

        options.progress.report(SyncProgressEvent::Finished {
            root,
            processed: processed as u64,
            failed: failures.len() as u64,
            cancelled,
        });
        tracing::info!(
            identity = %identity.id,
            processed,
            chunks_written,
            chunks_deleted,
            failed = failures.len(),
            cancelled,
            generation = snapshot.generation,
            "sync finished"
        );

        Ok(SyncReport {
            run_id: run_id.to_string(),
            identity: identity.id.clone(),
            root: identity.root.clone(),
            collection: identity.collection.clone(),
            plan: summary,
            processed,
            chunks_written,
            chunks_deleted,
            failures: std::mem::take(failures),
            cancelled,
            generation: snapshot.generation,
            files: snapshot.files.len(),
            chunks: snapshot.chunk_count(),
            started_at,
            finished_at,
        })
    }
}

/// Removed files first, then added and modified files in path order.
fn build_tasks(plan: &SyncPlan, snapshot: &Snapshot) -> Vec<FileTask> {
    let removed = plan.removed.iter().map(|path| FileTask {
        relative_path: path.clone(),
        action: FileAction::Remove,
        prior: snapshot.files.get(path).cloned(),
    });
    let indexed = plan.files_to_index().into_iter().map(|path| {
        let action = if plan.added.contains(&path) {
            FileAction::Add
        } else {
            FileAction::Modify
        };
        FileTask {
            prior: snapshot.files.get(&path).cloned(),
            relative_path: path,
            action,
        }
    });
    removed.chain(indexed).collect()
}
