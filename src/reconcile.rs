//! Reconciliation: make the remote store mirror the local tree.
//!
//! A pass has two phases:
//!
//! 1. **Plan**: list the remote store into a [`RemoteSnapshot`], enumerate
//!    in-scope local files with the [`Walker`], hash them, and split them
//!    into a [`SyncPlan`].
//! 2. **Execute**: run every upload and delete with at most `concurrency`
//!    operations outstanding, counting outcomes into a [`SyncResult`].
//!
//! Per-item failures are counted and logged. Only an unreadable snapshot,
//! an exhausted quota or a failed local enumeration end the pass with an
//! error.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::git::VersionControl;
use crate::ignore::IgnoreResolver;
use crate::models::{FileState, IdentifierMode, LocalFileEntry, RemoteFileRecord, SyncResult};
use crate::progress::{SyncProgress, SyncProgressReporter};
use crate::snapshot::RemoteSnapshot;
use crate::store::{ensure_store, RemoteStore, StoreError};
use crate::transfer::{self, UploadOutcome};
use crate::walker::Walker;

pub const DEFAULT_CONCURRENCY: usize = 100;

/// The work a pass will do, computed before anything is sent.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// New files, or files whose hash differs from the remote one.
    pub to_upload: Vec<LocalFileEntry>,
    /// Remote records under the root with no in-scope local file.
    pub to_delete: Vec<RemoteFileRecord>,
    /// Local files whose hash matches the remote record.
    pub unchanged: Vec<LocalFileEntry>,
    /// Empty files and files that vanished while being hashed.
    pub skipped: Vec<LocalFileEntry>,
    /// Local files that could not be read.
    pub unreadable: Vec<PathBuf>,
}

impl SyncPlan {
    /// Number of operations that touch the remote store.
    pub fn total(&self) -> usize {
        self.to_upload.len() + self.to_delete.len()
    }

    /// Every item the pass settles, including ones needing no remote work.
    fn items(&self) -> u64 {
        (self.total() + self.unchanged.len() + self.skipped.len() + self.unreadable.len()) as u64
    }
}

/// Result of a completed pass, with the snapshot updated to reflect it.
#[derive(Debug)]
pub struct SyncOutcome {
    pub result: SyncResult,
    pub snapshot: RemoteSnapshot,
}

enum Job {
    Upload(LocalFileEntry),
    Delete(RemoteFileRecord),
}

enum JobResult {
    Uploaded(RemoteFileRecord),
    Unchanged,
    Skipped,
    Deleted(String),
    Failed(StoreError),
}

/// Drives reconciliation passes for one root against one remote container.
pub struct ReconciliationEngine {
    remote: Arc<dyn RemoteStore>,
    store: String,
    resolver: Arc<IgnoreResolver>,
    vcs: Option<Arc<dyn VersionControl>>,
    identifier: IdentifierMode,
    concurrency: usize,
    dry_run: bool,
    progress: Option<Arc<dyn SyncProgressReporter>>,
}

impl ReconciliationEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: impl Into<String>,
        resolver: Arc<IgnoreResolver>,
    ) -> Self {
        Self {
            remote,
            store: store.into(),
            resolver,
            vcs: None,
            identifier: IdentifierMode::default(),
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
            progress: None,
        }
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn identifier(mut self, mode: IdentifierMode) -> Self {
        self.identifier = mode;
        self
    }

    /// Ceiling on simultaneously outstanding uploads and deletes.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn progress(mut self, reporter: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn store_name(&self) -> &str {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<IgnoreResolver> {
        &self.resolver
    }

    pub fn identifier_mode(&self) -> IdentifierMode {
        self.identifier
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Retrieve the remote container, creating it if it does not exist.
    ///
    /// A dry run never creates it; a missing container reads as empty.
    pub async fn ensure_store(&self) -> Result<(), SyncError> {
        let ready = if self.dry_run {
            match self.remote.retrieve(&self.store).await {
                Err(StoreError::NotFound(_)) => return Ok(()),
                other => other,
            }
        } else {
            ensure_store(self.remote.as_ref(), &self.store).await
        };
        ready
            .map(|info| debug!(store = %info.name, "remote store ready"))
            .map_err(|source| match source {
                StoreError::QuotaExceeded(msg) => SyncError::QuotaExceeded(msg),
                source => SyncError::StoreSetup {
                    store: self.store.clone(),
                    source,
                },
            })
    }

    /// One full pass: fetch the snapshot, then plan and execute.
    pub async fn sync(&self, root: &Path) -> Result<SyncOutcome, SyncError> {
        let snapshot = match RemoteSnapshot::fetch(self.remote.as_ref(), &self.store).await {
            Ok(snapshot) => snapshot,
            Err(StoreError::NotFound(_)) if self.dry_run => RemoteSnapshot::new(),
            Err(StoreError::QuotaExceeded(msg)) => return Err(SyncError::QuotaExceeded(msg)),
            Err(e) => return Err(SyncError::SnapshotUnavailable(e)),
        };
        self.sync_with_snapshot(root, snapshot).await
    }

    /// Plan and execute against an already fetched snapshot.
    pub async fn sync_with_snapshot(
        &self,
        root: &Path,
        snapshot: RemoteSnapshot,
    ) -> Result<SyncOutcome, SyncError> {
        let plan = self.plan(root, &snapshot).await?;
        info!(
            root = %root.display(),
            upload = plan.to_upload.len(),
            delete = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            dry_run = self.dry_run,
            "sync plan ready"
        );
        self.execute(plan, snapshot).await
    }

    /// Compare the in-scope local files under `root` with `snapshot`.
    pub async fn plan(&self, root: &Path, snapshot: &RemoteSnapshot) -> Result<SyncPlan, SyncError> {
        let paths = self.local_files(root).await?;
        let entries = self.hash_all(root, paths).await;

        let mut plan = SyncPlan::default();
        let mut local_ids = HashSet::new();

        for entry in entries {
            match entry {
                Ok(entry) => {
                    local_ids.insert(entry.external_id.clone());
                    match entry.state {
                        FileState::Present => {
                            if entry.hash.is_some()
                                && entry.hash.as_deref() == snapshot.hash_of(&entry.external_id)
                            {
                                plan.unchanged.push(entry);
                            } else {
                                plan.to_upload.push(entry);
                            }
                        }
                        FileState::Empty | FileState::Missing => plan.skipped.push(entry),
                    }
                }
                Err((path, err)) => {
                    warn!(path = %path.display(), error = %err, "failed to read file");
                    // Keep its remote record: an unreadable file is not a deleted one.
                    local_ids.insert(self.identifier.external_id(&path, root));
                    plan.unreadable.push(path);
                }
            }
        }

        let mut to_delete: Vec<RemoteFileRecord> = snapshot
            .iter()
            .filter(|record| !local_ids.contains(&record.external_id))
            .filter(|record| self.identifier.local_path(&record.external_id, root).is_some())
            .cloned()
            .collect();
        to_delete.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        plan.to_delete = to_delete;

        Ok(plan)
    }

    async fn local_files(&self, root: &Path) -> Result<Vec<PathBuf>, SyncError> {
        let mut walker = Walker::new(root, Arc::clone(&self.resolver));
        if let Some(vcs) = &self.vcs {
            walker = walker.with_vcs(Arc::clone(vcs));
        }
        let mut files = tokio::task::spawn_blocking(move || walker.files().collect::<Vec<_>>())
            .await
            .map_err(|e| SyncError::Walk(anyhow::Error::new(e).context("walker task failed")))?;
        files.sort();
        debug!(root = %root.display(), files = files.len(), "enumerated local files");
        Ok(files)
    }

    /// Hash every file, reading at most `concurrency` at a time.
    async fn hash_all(&self, root: &Path, paths: Vec<PathBuf>) -> Vec<Loaded> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (index, path) in paths.iter().cloned().enumerate() {
            let sem = Arc::clone(&sem);
            let external_id = self.identifier.external_id(&path, root);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let loaded = LocalFileEntry::load(path.clone(), external_id).await;
                (index, loaded.map_err(|e| (path, e)))
            });
        }

        let mut slots: Vec<Option<Loaded>> = paths.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, loaded)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(loaded);
                    }
                }
                Err(e) => warn!(error = %e, "hash task failed"),
            }
        }
        in_walk_order(paths, slots)
    }

    async fn execute(
        &self,
        plan: SyncPlan,
        mut snapshot: RemoteSnapshot,
    ) -> Result<SyncOutcome, SyncError> {
        let mut result = SyncResult {
            total: plan.items(),
            ..SyncResult::default()
        };

        for entry in plan.unchanged.iter().chain(plan.skipped.iter()) {
            result.processed += 1;
            self.report(&result, Some(&entry.path));
        }
        for path in &plan.unreadable {
            result.processed += 1;
            result.errors += 1;
            self.report(&result, Some(path));
        }

        let jobs = plan
            .to_upload
            .into_iter()
            .map(Job::Upload)
            .chain(plan.to_delete.into_iter().map(Job::Delete));

        if self.dry_run {
            for job in jobs {
                result.processed += 1;
                let path = match &job {
                    Job::Upload(entry) => {
                        result.uploaded += 1;
                        info!(path = %entry.path.display(), "would upload");
                        entry.path.clone()
                    }
                    Job::Delete(record) => {
                        result.deleted += 1;
                        info!(external_id = %record.external_id, "would delete");
                        PathBuf::from(&record.external_id)
                    }
                };
                self.report(&result, Some(&path));
            }
            return Ok(SyncOutcome { result, snapshot });
        }

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for job in jobs {
            let sem = Arc::clone(&sem);
            let remote = Arc::clone(&self.remote);
            let store = self.store.clone();
            let known_hash = match &job {
                Job::Upload(entry) => snapshot.hash_of(&entry.external_id).map(str::to_string),
                Job::Delete(_) => None,
            };
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                run_job(remote.as_ref(), &store, job, known_hash).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (path, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "sync task failed");
                    result.processed += 1;
                    result.errors += 1;
                    self.report(&result, None);
                    continue;
                }
            };
            result.processed += 1;
            match outcome {
                JobResult::Uploaded(record) => {
                    result.uploaded += 1;
                    snapshot.insert(record);
                }
                JobResult::Deleted(external_id) => {
                    result.deleted += 1;
                    snapshot.remove(&external_id);
                }
                JobResult::Unchanged | JobResult::Skipped => {}
                JobResult::Failed(StoreError::QuotaExceeded(msg)) => {
                    warn!(path = %path.display(), "quota exceeded, stopping pass");
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    return Err(SyncError::QuotaExceeded(msg));
                }
                JobResult::Failed(err) => {
                    warn!(path = %path.display(), error = %err, "sync item failed");
                    result.errors += 1;
                }
            }
            self.report(&result, Some(&path));
        }

        Ok(SyncOutcome { result, snapshot })
    }

    fn report(&self, result: &SyncResult, path: Option<&Path>) {
        if let Some(reporter) = &self.progress {
            reporter.report(&SyncProgress::new(result, path));
        }
    }
}

async fn run_job(
    remote: &dyn RemoteStore,
    store: &str,
    job: Job,
    known_hash: Option<String>,
) -> (PathBuf, JobResult) {
    match job {
        Job::Upload(entry) => {
            let outcome = transfer::upload(
                remote,
                store,
                &entry.path,
                &entry.external_id,
                known_hash.as_deref(),
            )
            .await;
            let result = match outcome {
                Ok(UploadOutcome::Uploaded(record)) => {
                    debug!(path = %entry.path.display(), "uploaded");
                    JobResult::Uploaded(record)
                }
                Ok(UploadOutcome::Unchanged) => JobResult::Unchanged,
                Ok(UploadOutcome::Skipped) => JobResult::Skipped,
                Err(e) => JobResult::Failed(e),
            };
            (entry.path, result)
        }
        Job::Delete(record) => {
            let path = PathBuf::from(&record.external_id);
            match transfer::delete(remote, store, &record.record_id).await {
                Ok(()) => {
                    debug!(external_id = %record.external_id, "deleted");
                    (path, JobResult::Deleted(record.external_id))
                }
                Err(e) => (path, JobResult::Failed(e)),
            }
        }
    }
}

type Loaded = Result<LocalFileEntry, (PathBuf, std::io::Error)>;

/// Hash results in walk order. A path whose task never reported back is
/// unreadable, which keeps its remote record.
fn in_walk_order(paths: Vec<PathBuf>, slots: Vec<Option<Loaded>>) -> Vec<Loaded> {
    paths
        .into_iter()
        .zip(slots)
        .map(|(path, slot)| {
            slot.unwrap_or_else(|| {
                Err((path, std::io::Error::new(std::io::ErrorKind::Other, "hash task failed")))
            })
        })
        .collect()
}
