// MongoDB snapshot store
//
// This module is responsible for:
// 1. Inserting one snapshot document per collection cycle
// 2. Assigning monotonic snapshot ids through a counters collection
// 3. Serving latest/range queries and retention deletes

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use futures_util::stream::TryStreamExt;
use mongodb::options::{
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{Snapshot, SnapshotStore, StoreError};
use crate::metrics::CollectionResult;

/// Default collection holding snapshots
pub const DEFAULT_COLLECTION: &str = "data";

/// Collection holding per-collection id sequences
const COUNTERS_COLLECTION: &str = "counters";

/// Snapshot as stored in MongoDB
///
/// # Document Structure
/// ```json
/// {
///   "_id": 42,
///   "payload": {
///     "nas": [ { "id": "abc...", "name": "web", "state": "running", ... } ],
///     "pi": { "error": "Error fetching containers: ..." }
///   },
///   "timestamp": ISODate("2024-01-15T10:30:00Z")
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(rename = "_id")]
    id: i64,

    payload: CollectionResult,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    timestamp: DateTime<Utc>,
}

impl From<SnapshotDocument> for Snapshot {
    fn from(document: SnapshotDocument) -> Self {
        Snapshot {
            id: document.id,
            payload: document.payload,
            timestamp: document.timestamp,
        }
    }
}

/// Snapshot store backed by a MongoDB collection
pub struct MongoSnapshotStore {
    /// MongoDB client for database operations
    client: Client,

    /// Database name where snapshots are stored
    database_name: String,

    /// Collection name for snapshot documents
    collection_name: String,
}

impl MongoSnapshotStore {
    /// Creates a new MongoSnapshotStore instance
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), mongodb::error::Error> {
    /// use dockstat_collector::storage::MongoSnapshotStore;
    ///
    /// let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
    /// let store = MongoSnapshotStore::new(&client, "dockstat", "data");
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(client: &Client, database_name: &str, collection_name: &str) -> Self {
        MongoSnapshotStore {
            client: client.clone(),
            database_name: database_name.to_string(),
            collection_name: collection_name.to_string(),
        }
    }

    fn collection(&self) -> Collection<SnapshotDocument> {
        self.client
            .database(&self.database_name)
            .collection(&self.collection_name)
    }

    /// Reserves the next snapshot id
    ///
    /// Uses an atomic `$inc` on a per-collection counter document, so ids are
    /// unique and increasing even with several writers.
    async fn next_id(&self) -> Result<i64, StoreError> {
        let counters: Collection<Document> = self
            .client
            .database(&self.database_name)
            .collection(COUNTERS_COLLECTION);

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let counter = counters
            .find_one_and_update(
                doc! { "_id": &self.collection_name },
                doc! { "$inc": { "seq": 1_i64 } },
                options,
            )
            .await?;

        counter
            .and_then(|document| document.get_i64("seq").ok())
            .ok_or_else(|| {
                StoreError::InvalidDocument(format!(
                    "counter for '{}' has no integer seq field",
                    self.collection_name
                ))
            })
    }

    /// Creates the timestamp index used by range queries and retention
    ///
    /// Optional, but recommended for production deployments.
    pub async fn create_indexes(&self) -> Result<(), StoreError> {
        info!("Creating indexes for collection '{}'", self.collection_name);

        let index = IndexModel::builder()
            .keys(doc! { "timestamp": -1 })
            .options(IndexOptions::builder().name("timestamp_idx".to_string()).build())
            .build();

        match self.collection().create_index(index, None).await {
            Ok(_) => {
                info!(
                    "Successfully created indexes for collection '{}'",
                    self.collection_name
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to create indexes for collection '{}': {}",
                    self.collection_name, e
                );
                Err(StoreError::Mongo(e))
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for MongoSnapshotStore {
    async fn append(&self, payload: &CollectionResult) -> Result<i64, StoreError> {
        let id = self.next_id().await?;
        let document = SnapshotDocument {
            id,
            payload: payload.clone(),
            timestamp: Utc::now(),
        };

        self.collection().insert_one(document, None).await?;
        debug!(
            "Stored snapshot {} in collection '{}'",
            id, self.collection_name
        );

        Ok(id)
    }

    async fn latest(&self) -> Result<Option<Snapshot>, StoreError> {
        let options = FindOneOptions::builder()
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .build();

        let document = self.collection().find_one(None, options).await?;
        Ok(document.map(Snapshot::from))
    }

    async fn range(&self, since: DateTime<Utc>) -> Result<Vec<Snapshot>, StoreError> {
        let filter = doc! { "timestamp": { "$gte": bson::DateTime::from_chrono(since) } };
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": 1, "_id": 1 })
            .build();

        let cursor = self.collection().find(filter, options).await?;
        let documents: Vec<SnapshotDocument> = cursor.try_collect().await?;

        Ok(documents.into_iter().map(Snapshot::from).collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let filter = doc! { "timestamp": { "$lt": bson::DateTime::from_chrono(cutoff) } };
        let result = self.collection().delete_many(filter, None).await?;
        Ok(result.deleted_count)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let result = self.collection().delete_many(doc! {}, None).await?;
        Ok(result.deleted_count)
    }
}
