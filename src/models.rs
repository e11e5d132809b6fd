//! Core data models used throughout tree-mirror.
//!
//! These types represent the local files, remote records, and pass results
//! that flow through the reconciliation and watch pipelines.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pattern::to_slash;

/// How a local path is turned into the remote store's external identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierMode {
    /// The absolute path string.
    #[default]
    Absolute,
    /// The root-relative path with `/` separators.
    Relative,
}

impl IdentifierMode {
    pub fn external_id(self, path: &Path, root: &Path) -> String {
        match self {
            IdentifierMode::Absolute => path.to_string_lossy().into_owned(),
            IdentifierMode::Relative => {
                to_slash(path.strip_prefix(root).unwrap_or(path))
            }
        }
    }

    /// Map an external identifier back to a local path.
    ///
    /// Returns `None` when the identifier does not lie under `root`; such
    /// records belong to another sync root and must never be deleted.
    pub fn local_path(self, external_id: &str, root: &Path) -> Option<PathBuf> {
        match self {
            IdentifierMode::Absolute => {
                let path = PathBuf::from(external_id);
                if path.is_absolute() && path.starts_with(root) && path != root {
                    Some(path)
                } else {
                    None
                }
            }
            IdentifierMode::Relative => {
                let rel = Path::new(external_id);
                let contained = !external_id.is_empty()
                    && rel
                        .components()
                        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
                contained.then(|| root.join(rel))
            }
        }
    }
}

/// Existence state of a local file at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Present,
    /// Exists with zero bytes; never uploaded.
    Empty,
    /// Vanished between enumeration and read.
    Missing,
}

/// A local file in scope for one pass. Never persisted.
#[derive(Debug, Clone)]
pub struct LocalFileEntry {
    pub path: PathBuf,
    pub external_id: String,
    /// Content hash; `None` unless `state` is `Present`.
    pub hash: Option<String>,
    pub state: FileState,
}

impl LocalFileEntry {
    /// Read and hash `path`. Only I/O errors other than not-found are `Err`.
    pub async fn load(path: PathBuf, external_id: String) -> std::io::Result<Self> {
        let (state, hash) = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => (FileState::Empty, None),
            Ok(bytes) => (FileState::Present, Some(content_hash(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (FileState::Missing, None),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            external_id,
            hash,
            state,
        })
    }
}

/// Metadata attached to every uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMetadata {
    pub path: String,
    pub hash: String,
}

/// One object in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileRecord {
    pub external_id: String,
    /// The store's own object id, used for deletes.
    pub record_id: String,
    /// Content hash from object metadata, when the store has one.
    pub hash: Option<String>,
}

/// Counters for one reconciliation pass.
///
/// Monotonically non-decreasing while the pass runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub processed: u64,
    pub uploaded: u64,
    pub deleted: u64,
    pub errors: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Add,
    Change,
    Unlink,
}

/// A classified filesystem notification.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub at: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            at: Utc::now(),
        }
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Valid UTF-8 with no NUL byte in the first 8000 bytes.
pub fn looks_like_text(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(8000)];
    !head.contains(&0) && std::str::from_utf8(bytes).is_ok()
}
