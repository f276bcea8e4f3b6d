// In-process snapshot store
//
// Keeps snapshots in memory. Used by tests and by deployments that only
// need the latest cycles while the process is alive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Snapshot, SnapshotStore, StoreError};
use crate::metrics::CollectionResult;

#[derive(Default)]
struct Inner {
    snapshots: Vec<Snapshot>,
    last_id: i64,
}

/// Snapshot store backed by a vector
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<Inner>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a snapshot with an explicit timestamp
    pub async fn append_at(&self, payload: &CollectionResult, timestamp: DateTime<Utc>) -> i64 {
        let mut inner = self.inner.lock().await;
        inner.last_id += 1;
        let id = inner.last_id;
        inner.snapshots.push(Snapshot {
            id,
            payload: payload.clone(),
            timestamp,
        });
        id
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.snapshots.len()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn append(&self, payload: &CollectionResult) -> Result<i64, StoreError> {
        Ok(self.append_at(payload, Utc::now()).await)
    }

    async fn latest(&self) -> Result<Option<Snapshot>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .snapshots
            .iter()
            .max_by_key(|s| (s.timestamp, s.id))
            .cloned())
    }

    async fn range(&self, since: DateTime<Utc>) -> Result<Vec<Snapshot>, StoreError> {
        let inner = self.inner.lock().await;
        let mut snapshots: Vec<Snapshot> = inner
            .snapshots
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| (s.timestamp, s.id));
        Ok(snapshots)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.snapshots.len();
        inner.snapshots.retain(|s| s.timestamp >= cutoff);
        Ok((before - inner.snapshots.len()) as u64)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let removed = inner.snapshots.len() as u64;
        inner.snapshots.clear();
        Ok(removed)
    }
}
