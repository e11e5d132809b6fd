//! File-backed [`RemoteStore`] for tests and offline use.
//!
//! Each container is one JSON document, `<dir>/<name>.json`, holding every
//! record and its content. All read-modify-write sequences go through a
//! single `tokio::sync::Mutex`, which grants the lock in request order, so
//! concurrent uploads never interleave on the backing file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ListPage, RemoteStore, StoreError, StoreInfo, StoreResult, UploadContent, UploadRequest};
use crate::models::RemoteFileRecord;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    name: String,
    #[serde(default)]
    records: BTreeMap<String, StoredRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    record_id: String,
    path: String,
    hash: String,
    encoding: Encoding,
    content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Encoding {
    Base64,
    Text,
}

/// Local substitute for the remote store.
pub struct LocalStore {
    dir: PathBuf,
    max_files: Option<usize>,
    page_size: usize,
    lock: Mutex<()>,
}

impl LocalStore {
    /// `max_files` caps the number of records; an upload that would exceed
    /// it fails with [`StoreError::QuotaExceeded`].
    pub fn new(dir: impl AsRef<Path>, max_files: Option<usize>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_files,
            page_size: DEFAULT_PAGE_SIZE,
            lock: Mutex::new(()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn file_for(&self, store: &str) -> PathBuf {
        self.dir.join(format!("{}.json", store))
    }

    async fn load(&self, store: &str) -> StoreResult<StoreFile> {
        let path = self.file_for(store);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("store '{}'", store)));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read {}", path.display()))
                    .into())
            }
        };
        let file: StoreFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt store file: {}", path.display()))?;
        Ok(file)
    }

    async fn save(&self, store: &str, file: &StoreFile) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.file_for(store);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(file).context("Failed to encode store file")?;
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Stored bytes for `external_id`, decoded from whichever encoding was
    /// used on upload.
    pub async fn read_content(&self, store: &str, external_id: &str) -> StoreResult<Option<Vec<u8>>> {
        let _guard = self.lock.lock().await;
        let file = self.load(store).await?;
        let Some(record) = file.records.get(external_id) else {
            return Ok(None);
        };
        let bytes = match record.encoding {
            Encoding::Text => record.content.clone().into_bytes(),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(&record.content)
                .context("Corrupt base64 content")?,
        };
        Ok(Some(bytes))
    }

    /// Number of records in the container.
    pub async fn len(&self, store: &str) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        Ok(self.load(store).await?.records.len())
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn list_files(&self, store: &str, cursor: Option<&str>) -> StoreResult<ListPage> {
        let _guard = self.lock.lock().await;
        let file = self.load(store).await?;

        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .with_context(|| format!("Invalid cursor: '{}'", c))?,
            None => 0,
        };
        let records: Vec<RemoteFileRecord> = file
            .records
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|(external_id, stored)| RemoteFileRecord {
                external_id: external_id.clone(),
                record_id: stored.record_id.clone(),
                hash: Some(stored.hash.clone()),
            })
            .collect();

        let next = offset + records.len();
        let has_more = next < file.records.len();
        Ok(ListPage {
            records,
            cursor: has_more.then(|| next.to_string()),
            has_more,
        })
    }

    async fn upload_file(&self, store: &str, request: UploadRequest) -> StoreResult<RemoteFileRecord> {
        let _guard = self.lock.lock().await;
        let mut file = self.load(store).await?;

        let exists = file.records.contains_key(&request.external_id);
        if let Some(max) = self.max_files {
            if !exists && file.records.len() >= max {
                return Err(StoreError::QuotaExceeded(format!(
                    "store '{}' is limited to {} files",
                    store, max
                )));
            }
        }

        let (encoding, content) = match request.content {
            UploadContent::Binary(bytes) => (
                Encoding::Base64,
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
            UploadContent::Text(text) => (Encoding::Text, text),
        };
        let record_id = file
            .records
            .get(&request.external_id)
            .map(|r| r.record_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        file.records.insert(
            request.external_id.clone(),
            StoredRecord {
                record_id: record_id.clone(),
                path: request.metadata.path,
                hash: request.metadata.hash.clone(),
                encoding,
                content,
            },
        );
        self.save(store, &file).await?;

        Ok(RemoteFileRecord {
            external_id: request.external_id,
            record_id,
            hash: Some(request.metadata.hash),
        })
    }

    async fn delete_file(&self, store: &str, record_id: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load(store).await?;

        let key = file
            .records
            .iter()
            .find(|(_, r)| r.record_id == record_id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| StoreError::NotFound(format!("record '{}'", record_id)))?;
        file.records.remove(&key);
        self.save(store, &file).await
    }

    async fn retrieve(&self, store: &str) -> StoreResult<StoreInfo> {
        let _guard = self.lock.lock().await;
        let file = self.load(store).await?;
        Ok(StoreInfo { name: file.name })
    }

    async fn create(&self, store: &str) -> StoreResult<StoreInfo> {
        let _guard = self.lock.lock().await;
        match self.load(store).await {
            Ok(file) => Ok(StoreInfo { name: file.name }),
            Err(StoreError::NotFound(_)) => {
                let file = StoreFile {
                    name: store.to_string(),
                    records: BTreeMap::new(),
                };
                self.save(store, &file).await?;
                Ok(StoreInfo {
                    name: store.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}
