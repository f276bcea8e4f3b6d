// Storage module - append-only snapshot persistence
//
// Every collection cycle is stored as one snapshot. Snapshots are never
// updated; they leave the store only through retention cleanup or `clear`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::CollectionResult;

pub mod memory;
pub mod mongo;

pub use memory::MemorySnapshotStore;
pub use mongo::MongoSnapshotStore;

/// How long snapshots are kept before retention cleanup removes them
pub const RETENTION_HOURS: i64 = 24;

/// Cutoff before which snapshots are due for removal
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(RETENTION_HOURS)
}

/// Errors that can occur during snapshot storage
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("MongoDB operation failed: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Invalid document format: {0}")]
    InvalidDocument(String),
}

/// One stored collection cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonically increasing id assigned on append
    pub id: i64,

    /// Per-host results of the cycle
    pub payload: CollectionResult,

    /// When the snapshot was appended
    pub timestamp: DateTime<Utc>,
}

/// Snapshot persistence consumed by the pipeline
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores a cycle's results and returns the new snapshot id
    async fn append(&self, payload: &CollectionResult) -> Result<i64, StoreError>;

    /// Most recent snapshot, if any
    async fn latest(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Snapshots taken at or after `since`, oldest first
    async fn range(&self, since: DateTime<Utc>) -> Result<Vec<Snapshot>, StoreError>;

    /// Removes snapshots strictly older than `cutoff`, returning how many
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Removes every snapshot, returning how many
    async fn clear(&self) -> Result<u64, StoreError>;
}
