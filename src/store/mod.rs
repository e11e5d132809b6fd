//! Remote content store abstraction.
//!
//! The [`RemoteStore`] trait is the whole contract the sync engine has with
//! the remote side: paginated listing, upsert-by-external-id upload,
//! delete-by-record-id, and container retrieve/create.
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`HttpStore`] | [`http`] | JSON-over-HTTP service |
//! | [`LocalStore`] | [`local`] | JSON file on disk, for tests and offline use |
//!
//! Implementations must be `Send + Sync`; uploads and deletes are issued
//! concurrently from many tasks.

pub mod http;
pub mod local;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{StoreBackend, StoreConfig};
use crate::models::{RemoteFileMetadata, RemoteFileRecord};

pub use http::HttpStore;
pub use local::LocalStore;

/// Failure kinds a caller must be able to tell apart.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The container or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The account ran out of quota. Fatal for a whole pass.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// The store refused this content (unsupported type, too large).
    #[error("content rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One page of a file listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPage {
    pub records: Vec<RemoteFileRecord>,
    /// Opaque cursor for the next page.
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// File content in one of the two upload encodings.
#[derive(Debug, Clone)]
pub enum UploadContent {
    /// Raw bytes; tried first.
    Binary(Vec<u8>),
    /// UTF-8 text; the fallback when binary is rejected.
    Text(String),
}

/// Upsert request keyed by `external_id`.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub external_id: String,
    pub content: UploadContent,
    pub metadata: RemoteFileMetadata,
}

/// Summary of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
}

/// Abstract remote store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_files`](RemoteStore::list_files) | One page of `{external_id, record_id, hash}` |
/// | [`upload_file`](RemoteStore::upload_file) | Upsert one object, returning its record |
/// | [`delete_file`](RemoteStore::delete_file) | Remove one object by record id |
/// | [`retrieve`](RemoteStore::retrieve) | Container existence check |
/// | [`create`](RemoteStore::create) | Create the container |
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_files(&self, store: &str, cursor: Option<&str>) -> StoreResult<ListPage>;

    async fn upload_file(&self, store: &str, request: UploadRequest)
        -> StoreResult<RemoteFileRecord>;

    async fn delete_file(&self, store: &str, record_id: &str) -> StoreResult<()>;

    /// `Err(StoreError::NotFound)` when the container does not exist.
    async fn retrieve(&self, store: &str) -> StoreResult<StoreInfo>;

    async fn create(&self, store: &str) -> StoreResult<StoreInfo>;
}

/// Retrieve the container, creating it when it does not exist yet.
pub async fn ensure_store(remote: &dyn RemoteStore, store: &str) -> StoreResult<StoreInfo> {
    match remote.retrieve(store).await {
        Ok(info) => Ok(info),
        Err(StoreError::NotFound(_)) => {
            tracing::info!(store, "creating remote store");
            remote.create(store).await
        }
        Err(e) => Err(e),
    }
}

/// Build the configured backend.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn RemoteStore>> {
    match config.backend {
        StoreBackend::Http => Ok(Arc::new(HttpStore::new(config)?)),
        StoreBackend::Local => Ok(Arc::new(LocalStore::new(
            &config.local_dir,
            config.max_files,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn ensure_store_creates_missing_container() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), None);
        assert!(matches!(
            store.retrieve("docs").await,
            Err(StoreError::NotFound(_))
        ));
        let info = ensure_store(&store, "docs").await.unwrap();
        assert_eq!(info.name, "docs");
        // Second call reuses it.
        assert_eq!(ensure_store(&store, "docs").await.unwrap(), info);
    }

    #[test]
    fn store_errors_describe_their_kind() {
        assert_eq!(
            StoreError::QuotaExceeded("files".into()).to_string(),
            "quota exceeded: files"
        );
        assert_eq!(
            StoreError::Rejected("binary".into()).to_string(),
            "content rejected: binary"
        );
    }
}
