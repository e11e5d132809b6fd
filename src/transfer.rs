//! Single-file upload and delete against the remote store.
//!
//! Shared by the reconciliation engine and the watch pipeline so both
//! apply the same skip, compare and fallback rules.

use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::models::{content_hash, looks_like_text, RemoteFileMetadata, RemoteFileRecord};
use crate::store::{RemoteStore, StoreError, StoreResult, UploadContent, UploadRequest};

/// What happened to one upload candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded(RemoteFileRecord),
    /// Content hash equals the known remote hash.
    Unchanged,
    /// Empty, or gone by the time it was read.
    Skipped,
}

/// Read, hash and upload `path` unless the remote already has this content.
///
/// Binary upload is tried first. If the store rejects it and the bytes are
/// text, the file is re-sent as text; otherwise the rejection is returned.
pub async fn upload(
    remote: &dyn RemoteStore,
    store: &str,
    path: &Path,
    external_id: &str,
    known_hash: Option<&str>,
) -> StoreResult<UploadOutcome> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "vanished before upload");
            return Ok(UploadOutcome::Skipped);
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to read {}", path.display()))
                .into())
        }
    };
    if bytes.is_empty() {
        return Ok(UploadOutcome::Skipped);
    }

    let hash = content_hash(&bytes);
    if known_hash == Some(hash.as_str()) {
        return Ok(UploadOutcome::Unchanged);
    }

    let metadata = RemoteFileMetadata {
        path: path.to_string_lossy().into_owned(),
        hash,
    };
    let request = UploadRequest {
        external_id: external_id.to_string(),
        content: UploadContent::Binary(bytes.clone()),
        metadata: metadata.clone(),
    };

    match remote.upload_file(store, request).await {
        Ok(record) => Ok(UploadOutcome::Uploaded(record)),
        Err(StoreError::Rejected(reason)) if looks_like_text(&bytes) => {
            debug!(path = %path.display(), %reason, "binary rejected, retrying as text");
            let text = String::from_utf8(bytes).context("Text detection accepted invalid UTF-8")?;
            let request = UploadRequest {
                external_id: external_id.to_string(),
                content: UploadContent::Text(text),
                metadata,
            };
            remote
                .upload_file(store, request)
                .await
                .map(UploadOutcome::Uploaded)
        }
        Err(e) => Err(e),
    }
}

/// Delete one remote object. A record that is already gone counts as deleted.
pub async fn delete(remote: &dyn RemoteStore, store: &str, record_id: &str) -> StoreResult<()> {
    match remote.delete_file(store, record_id).await {
        Err(StoreError::NotFound(_)) => {
            debug!(record_id, "remote record already gone");
            Ok(())
        }
        other => other,
    }
}
