use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tree_mirror::error::SyncError;
use tree_mirror::git::{git_available, Git};
use tree_mirror::ignore::IgnoreResolver;
use tree_mirror::models::{content_hash, IdentifierMode, RemoteFileMetadata};
use tree_mirror::progress::SyncProgress;
use tree_mirror::reconcile::ReconciliationEngine;
use tree_mirror::snapshot::RemoteSnapshot;
use tree_mirror::store::{LocalStore, RemoteStore, StoreError, UploadContent, UploadRequest};

const STORE: &str = "mirror";

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    store: Arc<LocalStore>,
}

fn setup_test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    fs::create_dir_all(&root).unwrap();
    let store = Arc::new(LocalStore::new(tmp.path().join("store"), None));
    TestEnv {
        _tmp: tmp,
        root,
        store,
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn engine(store: &Arc<LocalStore>) -> ReconciliationEngine {
    let remote: Arc<dyn RemoteStore> = store.clone();
    ReconciliationEngine::new(
        remote,
        STORE,
        Arc::new(IgnoreResolver::new(".mirrorignore", &[])),
    )
}

async fn synced(engine: &ReconciliationEngine, root: &Path) -> tree_mirror::models::SyncResult {
    engine.ensure_store().await.unwrap();
    engine.sync(root).await.unwrap().result
}

#[tokio::test]
async fn upload_modify_delete_cycle() {
    let env = setup_test_env();
    write(&env.root, "a.txt", "hello");
    write(&env.root, ".gitignore", "*.log\n");
    write(&env.root, "b.log", "ignored");
    let engine = engine(&env.store);

    let first = synced(&engine, &env.root).await;
    assert_eq!(first.uploaded, 1);
    assert_eq!(first.processed, 1);
    assert_eq!(first.deleted, 0);
    assert_eq!(first.errors, 0);

    write(&env.root, "a.txt", "hello, again");
    let second = synced(&engine, &env.root).await;
    assert_eq!(second.uploaded, 1);

    fs::remove_file(env.root.join("a.txt")).unwrap();
    let third = synced(&engine, &env.root).await;
    assert_eq!(third.deleted, 1);
    assert_eq!(third.uploaded, 0);
    assert_eq!(env.store.len(STORE).await.unwrap(), 0);
}

#[tokio::test]
async fn second_pass_without_changes_uploads_nothing() {
    let env = setup_test_env();
    write(&env.root, "src/main.rs", "fn main() {}");
    write(&env.root, "src/lib.rs", "pub mod a;");
    write(&env.root, "README.md", "# readme");
    let engine = engine(&env.store);

    assert_eq!(synced(&engine, &env.root).await.uploaded, 3);
    let again = synced(&engine, &env.root).await;
    assert_eq!(again.uploaded, 0);
    assert_eq!(again.deleted, 0);
    assert_eq!(again.processed, 3);
}

#[tokio::test]
async fn descendant_negation_overrides_ancestor_ignore() {
    let env = setup_test_env();
    write(&env.root, ".gitignore", "*.txt\n");
    write(&env.root, "subdir/.gitignore", "!keep.txt\n");
    write(&env.root, "subdir/keep.txt", "keep");
    write(&env.root, "subdir/other.txt", "other");
    write(&env.root, "top.txt", "top");
    let engine = engine(&env.store).identifier(IdentifierMode::Relative);
    engine.ensure_store().await.unwrap();

    let plan = engine.plan(&env.root, &RemoteSnapshot::new()).await.unwrap();
    let ids: Vec<&str> = plan.to_upload.iter().map(|e| e.external_id.as_str()).collect();
    assert_eq!(ids, vec!["subdir/keep.txt"]);
}

#[tokio::test]
async fn hidden_directories_are_never_candidates() {
    let env = setup_test_env();
    write(&env.root, ".config/settings.json", "{}");
    write(&env.root, "visible/.cache/blob", "x");
    write(&env.root, "visible/file.rs", "fn f() {}");
    // Un-ignoring everything cannot bring hidden entries back.
    write(&env.root, ".mirrorignore", "!*\n!.config/\n");
    let engine = engine(&env.store).identifier(IdentifierMode::Relative);

    let plan = engine.plan(&env.root, &RemoteSnapshot::new()).await.unwrap();
    let ids: Vec<&str> = plan.to_upload.iter().map(|e| e.external_id.as_str()).collect();
    assert_eq!(ids, vec!["visible/file.rs"]);
}

#[tokio::test]
async fn records_outside_the_root_are_never_deleted() {
    let env = setup_test_env();
    write(&env.root, "a.txt", "a");
    let engine = engine(&env.store);
    engine.ensure_store().await.unwrap();

    let foreign = "/somewhere/else/entirely.txt";
    env.store
        .upload_file(
            STORE,
            UploadRequest {
                external_id: foreign.to_string(),
                content: UploadContent::Text("other root".into()),
                metadata: RemoteFileMetadata {
                    path: foreign.to_string(),
                    hash: content_hash(b"other root"),
                },
            },
        )
        .await
        .unwrap();

    let snapshot = RemoteSnapshot::fetch(env.store.as_ref(), STORE).await.unwrap();
    let plan = engine.plan(&env.root, &snapshot).await.unwrap();
    assert!(plan.to_delete.is_empty());

    let result = engine.sync(&env.root).await.unwrap().result;
    assert_eq!(result.deleted, 0);
    assert_eq!(env.store.len(STORE).await.unwrap(), 2);
}

#[tokio::test]
async fn newly_ignored_files_are_removed_remotely() {
    let env = setup_test_env();
    write(&env.root, "notes.md", "draft");
    write(&env.root, "code.rs", "fn x() {}");
    let engine = engine(&env.store);
    assert_eq!(synced(&engine, &env.root).await.uploaded, 2);

    write(&env.root, ".mirrorignore", "*.md\n");
    let result = synced(&engine, &env.root).await;
    assert_eq!(result.deleted, 1);
    assert_eq!(result.uploaded, 0);
    assert_eq!(env.store.len(STORE).await.unwrap(), 1);
}

#[tokio::test]
async fn dry_run_reports_the_real_plan_without_mutating() {
    let env = setup_test_env();
    write(&env.root, "a.txt", "a");
    write(&env.root, "b/c.txt", "c");
    let dry = engine(&env.store).dry_run(true);

    dry.ensure_store().await.unwrap();
    let preview = dry.sync(&env.root).await.unwrap().result;
    assert_eq!(preview.uploaded, 2);
    assert!(matches!(
        env.store.retrieve(STORE).await,
        Err(StoreError::NotFound(_))
    ));

    let real = synced(&engine(&env.store), &env.root).await;
    assert_eq!(real.uploaded, preview.uploaded);
    assert_eq!(real.deleted, preview.deleted);

    fs::remove_file(env.root.join("a.txt")).unwrap();
    let preview = engine(&env.store).dry_run(true).sync(&env.root).await.unwrap().result;
    assert_eq!(preview.deleted, 1);
    assert_eq!(env.store.len(STORE).await.unwrap(), 2);
}

#[tokio::test]
async fn empty_files_are_skipped_not_errors() {
    let env = setup_test_env();
    write(&env.root, "empty.txt", "");
    write(&env.root, "full.txt", "content");
    let engine = engine(&env.store);

    let result = synced(&engine, &env.root).await;
    assert_eq!(result.uploaded, 1);
    assert_eq!(result.errors, 0);
    assert_eq!(result.processed, 2);
    assert_eq!(result.total, 2);
}

#[tokio::test]
async fn progress_fires_per_item_and_reaches_total() {
    let env = setup_test_env();
    for i in 0..6 {
        write(&env.root, &format!("f{i}.txt"), &format!("file {i}"));
    }
    write(&env.root, "empty.txt", "");

    let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let engine = engine(&env.store)
        .concurrency(2)
        .progress(Arc::new(move |p: &SyncProgress| sink.lock().unwrap().push(p.clone())));

    let result = synced(&engine, &env.root).await;
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 7);
    assert!(events.windows(2).all(|w| w[0].processed < w[1].processed
        && w[0].uploaded <= w[1].uploaded));
    let last = events.last().unwrap();
    assert_eq!(last.processed, last.total);
    assert_eq!(last.uploaded, result.uploaded);
    assert!(events.iter().all(|e| e.current_path.is_some()));
}

#[tokio::test]
async fn quota_exhaustion_ends_the_pass() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    for i in 0..5 {
        write(&root, &format!("f{i}.txt"), &format!("file {i}"));
    }
    let store = Arc::new(LocalStore::new(tmp.path().join("store"), Some(2)));
    let engine = engine(&store).concurrency(1);
    engine.ensure_store().await.unwrap();

    let err = engine.sync(&root).await.unwrap_err();
    assert!(err.is_quota(), "unexpected error: {err}");
    assert!(matches!(err, SyncError::QuotaExceeded(_)));
    assert_eq!(store.len(STORE).await.unwrap(), 2);
}

#[tokio::test]
async fn missing_store_is_a_snapshot_failure() {
    let env = setup_test_env();
    write(&env.root, "a.txt", "a");
    let engine = engine(&env.store);

    let err = engine.sync(&env.root).await.unwrap_err();
    assert!(matches!(err, SyncError::SnapshotUnavailable(_)));
}

#[tokio::test]
async fn git_mode_applies_custom_ignore_layer() {
    if !git_available() {
        return;
    }
    let env = setup_test_env();
    let status = Command::new("git")
        .args(["init", "-q"])
        .current_dir(&env.root)
        .status()
        .unwrap();
    assert!(status.success());
    write(&env.root, ".gitignore", "*.log\n");
    write(&env.root, ".mirrorignore", "secret.txt\n");
    write(&env.root, "a.txt", "a");
    write(&env.root, "debug.log", "noise");
    write(&env.root, "secret.txt", "hush");
    write(&env.root, "nested/b.txt", "b");

    let engine = engine(&env.store)
        .identifier(IdentifierMode::Relative)
        .with_vcs(Arc::new(Git::new()));
    let plan = engine.plan(&env.root, &RemoteSnapshot::new()).await.unwrap();
    let ids: Vec<&str> = plan.to_upload.iter().map(|e| e.external_id.as_str()).collect();
    assert_eq!(ids, vec!["a.txt", "nested/b.txt"]);
}
