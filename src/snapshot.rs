//! Remote snapshot: the store's contents as of the start of a pass.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::models::RemoteFileRecord;
use crate::store::{RemoteStore, StoreResult};

/// External id → remote record, built from a full paginated listing.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    records: HashMap<String, RemoteFileRecord>,
}

impl RemoteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page through the whole listing of `store`.
    ///
    /// Follows `cursor` until `has_more` is false or a cursor repeats. When an external id
    /// appears more than once, the last one listed wins. Any page failure
    /// fails the whole fetch; a partial snapshot is never returned.
    pub async fn fetch(remote: &dyn RemoteStore, store: &str) -> StoreResult<Self> {
        let mut snapshot = Self::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        let mut pages = 0u64;

        loop {
            let page = remote.list_files(store, cursor.as_deref()).await?;
            pages += 1;
            for record in page.records {
                snapshot.insert(record);
            }

            if !page.has_more {
                break;
            }
            match page.cursor {
                Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                _ => {
                    // A cursor already followed would loop forever.
                    warn!(store, pages, "listing reported more pages without a new cursor");
                    break;
                }
            }
        }

        debug!(store, pages, records = snapshot.len(), "fetched remote snapshot");
        Ok(snapshot)
    }

    pub fn get(&self, external_id: &str) -> Option<&RemoteFileRecord> {
        self.records.get(external_id)
    }

    pub fn hash_of(&self, external_id: &str) -> Option<&str> {
        self.records.get(external_id)?.hash.as_deref()
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.records.contains_key(external_id)
    }

    pub fn insert(&mut self, record: RemoteFileRecord) {
        self.records.insert(record.external_id.clone(), record);
    }

    pub fn remove(&mut self, external_id: &str) -> Option<RemoteFileRecord> {
        self.records.remove(external_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteFileRecord> {
        self.records.values()
    }
}
