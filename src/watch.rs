//! Live mirroring: one baseline pass, then filesystem notifications.
//!
//! A session moves through [`WatchState`]:
//!
//! ```text
//! Initializing ──▶ Reconciling ──▶ Watching ──▶ Stopped
//!      │                │               │
//!      └────────────────┴───────────────┴──▶ Fatal
//! ```
//!
//! Each notification is filtered (the `.git` control directory, symlinks,
//! ignored paths), classified by whether the path still exists and whether
//! a remote record is tracked for it, then handed to a bounded worker pool
//! running the same upload/delete primitives as a full pass. A directory
//! notification covers every file below it.
//! Outcomes accumulate in an [`EventTally`] flushed once per debounce
//! window; verbose mode prints every event instead.

use std::ffi::OsStr;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::error::SyncError;
use crate::models::{RemoteFileRecord, SyncResult, WatchEvent, WatchEventKind};
use crate::progress::summary_line;
use crate::reconcile::ReconciliationEngine;
use crate::snapshot::RemoteSnapshot;
use crate::store::StoreError;
use crate::transfer::{self, UploadOutcome};
use crate::walker::Walker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Initializing,
    Reconciling,
    Watching,
    Stopped,
    Fatal,
}

/// Rolling counts of settled watch events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventTally {
    pub added: u64,
    pub changed: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl EventTally {
    pub fn is_empty(&self) -> bool {
        *self == EventTally::default()
    }

    pub fn record(&mut self, kind: WatchEventKind) {
        match kind {
            WatchEventKind::Add => self.added += 1,
            WatchEventKind::Change => self.changed += 1,
            WatchEventKind::Unlink => self.deleted += 1,
        }
    }

    /// `"watch: 3 added, 1 changed"`; zero counts are left out.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            (self.added, "added"),
            (self.changed, "changed"),
            (self.deleted, "deleted"),
            (self.errors, "errors"),
        ]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{} {}", n, label))
        .collect();
        format!("watch: {}", parts.join(", "))
    }

    /// Return the current counts and reset to zero.
    pub fn take(&mut self) -> EventTally {
        std::mem::take(self)
    }
}

/// How a watch session ended.
#[derive(Debug, Clone)]
pub struct WatchReport {
    pub state: WatchState,
    /// Result of the baseline pass.
    pub initial: SyncResult,
    /// Every event settled while watching.
    pub events: EventTally,
}

pub struct WatchPipeline {
    engine: ReconciliationEngine,
    root: PathBuf,
    debounce: Duration,
    grace: Duration,
    verbose: bool,
    state: WatchState,
}

impl WatchPipeline {
    pub fn new(engine: ReconciliationEngine, root: impl Into<PathBuf>, config: &WatchConfig) -> Self {
        Self {
            engine,
            root: root.into(),
            debounce: Duration::from_millis(config.debounce_ms.max(1)),
            grace: Duration::from_millis(config.shutdown_grace_ms),
            verbose: false,
            state: WatchState::Initializing,
        }
    }

    /// Print every event as it settles instead of per-window summaries.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    pub async fn run<S>(mut self, shutdown: S) -> Result<WatchReport, SyncError>
    where
        S: Future<Output = ()>,
    {
        match self.run_inner(shutdown).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.transition(WatchState::Fatal);
                Err(e)
            }
        }
    }

    async fn run_inner<S>(&mut self, shutdown: S) -> Result<WatchReport, SyncError>
    where
        S: Future<Output = ()>,
    {
        self.engine.ensure_store().await?;

        self.transition(WatchState::Reconciling);
        let outcome = self.engine.sync(&self.root).await?;
        let dry_run = self.engine.is_dry_run();
        println!(
            "{}",
            summary_line(if dry_run { "Scanned" } else { "Synced" }, &outcome.result, dry_run)
        );
        if dry_run {
            self.transition(WatchState::Stopped);
            return Ok(WatchReport {
                state: WatchState::Stopped,
                initial: outcome.result,
                events: EventTally::default(),
            });
        }

        let (notify_tx, mut notify_rx) = mpsc::channel::<notify::Result<Event>>(1024);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.blocking_send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| SyncError::Walk(anyhow::Error::new(e).context("failed to create watcher")))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| {
                SyncError::Walk(
                    anyhow::Error::new(e)
                        .context(format!("failed to watch {}", self.root.display())),
                )
            })?;

        self.transition(WatchState::Watching);
        let mut session = WatchSession::new(&self.engine, &self.root, outcome.snapshot, self.verbose);
        let mut ticker = tokio::time::interval(self.debounce);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }

                Some(res) = notify_rx.recv() => {
                    match res {
                        Ok(event) => {
                            if matches!(event.kind, EventKind::Access(_)) {
                                continue;
                            }
                            for path in event.paths {
                                session.on_path(path).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "watch error"),
                    }
                }

                Some(joined) = session.tasks.join_next(), if !session.tasks.is_empty() => {
                    session.on_settled(joined)?;
                }

                _ = ticker.tick() => {
                    session.flush();
                }
            }
        }

        drop(watcher);
        if tokio::time::timeout(self.grace, session.settle()).await.is_err() {
            warn!(pending = session.tasks.len(), "grace period elapsed with operations in flight");
            session.tasks.abort_all();
        }
        session.flush();
        let events = session.totals;
        drop(session);
        self.transition(WatchState::Stopped);

        Ok(WatchReport {
            state: WatchState::Stopped,
            initial: outcome.result,
            events,
        })
    }

    fn transition(&mut self, next: WatchState) {
        debug!(from = ?self.state, to = ?next, "watch state");
        self.state = next;
    }
}

enum TaskOutcome {
    Uploaded(RemoteFileRecord),
    Unchanged,
    Deleted(String),
}

type TaskResult = (WatchEvent, Result<TaskOutcome, StoreError>);

/// Mutable state of the `Watching` phase.
struct WatchSession<'a> {
    engine: &'a ReconciliationEngine,
    root: &'a Path,
    tracked: RemoteSnapshot,
    tasks: JoinSet<TaskResult>,
    sem: Arc<Semaphore>,
    window: EventTally,
    totals: EventTally,
    verbose: bool,
}

impl<'a> WatchSession<'a> {
    fn new(
        engine: &'a ReconciliationEngine,
        root: &'a Path,
        tracked: RemoteSnapshot,
        verbose: bool,
    ) -> Self {
        Self {
            engine,
            root,
            tracked,
            tasks: JoinSet::new(),
            sem: Arc::new(Semaphore::new(engine.concurrency_limit())),
            window: EventTally::default(),
            totals: EventTally::default(),
            verbose,
        }
    }

    /// Classify one notified path and schedule work for every file it covers.
    async fn on_path(&mut self, path: PathBuf) {
        for event in self.classify(path).await {
            self.schedule(event);
        }
    }

    fn schedule(&mut self, event: WatchEvent) {
        let remote = Arc::clone(self.engine.remote());
        let store = self.engine.store_name().to_string();
        let sem = Arc::clone(&self.sem);
        let external_id = self.engine.identifier_mode().external_id(&event.path, self.root);

        match event.kind {
            WatchEventKind::Add | WatchEventKind::Change => {
                let known_hash = self.tracked.hash_of(&external_id).map(str::to_string);
                self.tasks.spawn(async move {
                    let _permit = sem.acquire_owned().await;
                    let result = transfer::upload(
                        remote.as_ref(),
                        &store,
                        &event.path,
                        &external_id,
                        known_hash.as_deref(),
                    )
                    .await
                    .map(|outcome| match outcome {
                        UploadOutcome::Uploaded(record) => TaskOutcome::Uploaded(record),
                        UploadOutcome::Unchanged | UploadOutcome::Skipped => TaskOutcome::Unchanged,
                    });
                    (event, result)
                });
            }
            WatchEventKind::Unlink => {
                let Some(record) = self.tracked.get(&external_id).cloned() else {
                    return;
                };
                self.tasks.spawn(async move {
                    let _permit = sem.acquire_owned().await;
                    let result = transfer::delete(remote.as_ref(), &store, &record.record_id)
                        .await
                        .map(|()| TaskOutcome::Deleted(record.external_id));
                    (event, result)
                });
            }
        }
    }

    /// Events for one notified path.
    ///
    /// An existing directory expands to the in-scope files below it. A
    /// vanished path unlinks every tracked record at or below it, since a
    /// renamed or moved directory is reported only by its own path.
    async fn classify(&self, path: PathBuf) -> Vec<WatchEvent> {
        let Ok(rel) = path.strip_prefix(self.root) else {
            return Vec::new();
        };
        if rel.as_os_str().is_empty() || rel.components().any(|c| c == Component::Normal(OsStr::new(".git"))) {
            return Vec::new();
        }

        let file_type = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => meta.file_type(),
            Err(_) => return self.removed_under(&path),
        };
        if file_type.is_dir() {
            return self.present_under(path).await;
        }
        if !file_type.is_file() {
            debug!(path = %path.display(), "not a regular file");
            return Vec::new();
        }
        if self.engine.resolver().is_ignored_as(&path, self.root, false) {
            return Vec::new();
        }
        vec![self.present(path)]
    }

    fn present(&self, path: PathBuf) -> WatchEvent {
        let external_id = self.engine.identifier_mode().external_id(&path, self.root);
        let kind = if self.tracked.contains(&external_id) {
            WatchEventKind::Change
        } else {
            WatchEventKind::Add
        };
        WatchEvent::new(kind, path)
    }

    async fn present_under(&self, dir: PathBuf) -> Vec<WatchEvent> {
        let walker = Walker::new(self.root, Arc::clone(self.engine.resolver()));
        let listed = tokio::task::spawn_blocking(move || {
            let files: Vec<PathBuf> = walker.subtree(&dir).collect();
            files
        })
        .await;
        match listed {
            Ok(files) => files.into_iter().map(|file| self.present(file)).collect(),
            Err(e) => {
                warn!(error = %e, "directory scan failed");
                Vec::new()
            }
        }
    }

    fn removed_under(&self, path: &Path) -> Vec<WatchEvent> {
        let mode = self.engine.identifier_mode();
        let mut events: Vec<WatchEvent> = self
            .tracked
            .iter()
            .filter_map(|record| mode.local_path(&record.external_id, self.root))
            .filter(|local| local.starts_with(path))
            .map(|local| WatchEvent::new(WatchEventKind::Unlink, local))
            .collect();
        if events.is_empty() {
            debug!(path = %path.display(), "untracked path removed");
        }
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }

    /// Fold a finished task into the tracked map and the tally.
    fn on_settled(&mut self, joined: Result<TaskResult, tokio::task::JoinError>) -> Result<(), SyncError> {
        let (event, result) = match joined {
            Ok(done) => done,
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => {
                warn!(error = %e, "watch task failed");
                self.count_error();
                return Ok(());
            }
        };

        match result {
            Ok(TaskOutcome::Uploaded(record)) => {
                // An add of a path already tracked by an earlier event in flight is a change.
                let kind = if event.kind == WatchEventKind::Add && self.tracked.contains(&record.external_id) {
                    WatchEventKind::Change
                } else {
                    event.kind
                };
                self.tracked.insert(record);
                self.count(kind, &event.path);
            }
            Ok(TaskOutcome::Deleted(external_id)) => {
                self.tracked.remove(&external_id);
                self.count(WatchEventKind::Unlink, &event.path);
            }
            Ok(TaskOutcome::Unchanged) => {}
            Err(StoreError::QuotaExceeded(msg)) => {
                self.tasks.abort_all();
                return Err(SyncError::QuotaExceeded(msg));
            }
            Err(e) => {
                warn!(path = %event.path.display(), error = %e, "watch event failed");
                if self.verbose {
                    println!("error {}: {}", event.path.display(), e);
                }
                self.count_error();
            }
        }
        Ok(())
    }

    fn count(&mut self, kind: WatchEventKind, path: &Path) {
        if self.verbose {
            let verb = match kind {
                WatchEventKind::Add => "added",
                WatchEventKind::Change => "changed",
                WatchEventKind::Unlink => "deleted",
            };
            println!("{} {}", verb, path.display());
        }
        self.window.record(kind);
        self.totals.record(kind);
    }

    fn count_error(&mut self) {
        self.window.errors += 1;
        self.totals.errors += 1;
    }

    /// Print the window's summary line and start a new window. Verbose
    /// sessions already printed each event and print nothing here.
    fn flush(&mut self) -> Option<String> {
        let window = self.window.take();
        if self.verbose || window.is_empty() {
            return None;
        }
        let line = window.summary();
        println!("{}", line);
        Some(line)
    }

    /// Wait for every scheduled operation and fold in the results.
    async fn settle(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = self.on_settled(joined) {
                warn!(error = %e, "stopping with a fatal store error");
                break;
            }
        }
    }
}
