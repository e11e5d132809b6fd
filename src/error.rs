//! Errors that end a whole reconciliation pass.
//!
//! Everything else (one unreadable file, one failed upload) is counted in
//! [`SyncResult::errors`](crate::models::SyncResult) and never becomes an
//! `Err`.

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote listing could not be read completely.
    #[error("failed to retrieve remote snapshot: {0}")]
    SnapshotUnavailable(#[source] StoreError),

    #[error("remote quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Retrieving or creating the remote container failed.
    #[error("failed to set up remote store '{store}': {source}")]
    StoreSetup {
        store: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to enumerate local files: {0}")]
    Walk(#[source] anyhow::Error),
}

impl SyncError {
    pub fn is_quota(&self) -> bool {
        matches!(self, SyncError::QuotaExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_is_distinguishable() {
        assert!(SyncError::QuotaExceeded("files".into()).is_quota());
        assert!(!SyncError::Walk(anyhow::anyhow!("io")).is_quota());
    }

    #[test]
    fn snapshot_error_mentions_cause() {
        let err = SyncError::SnapshotUnavailable(StoreError::NotFound("store 'docs'".into()));
        assert!(err.to_string().contains("store 'docs'"));
    }
}
