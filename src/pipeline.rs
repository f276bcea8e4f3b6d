// Pipeline module - one polling cycle end to end
//
// registry -> collect -> (store in background) -> diff -> notify
//
// Every phase logs its own failures and the cycle carries on; nothing here
// stops the scheduler.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{HostDescriptor, HostRegistry};
use crate::metrics::{CollectionResult, Collector};
use crate::notify::Notifier;
use crate::scheduler::{CleanupJob, PollJob};
use crate::state::StateDiffer;
use crate::storage::{retention_cutoff, SnapshotStore};

/// Summary of a finished cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub hosts: usize,
    pub failed_hosts: usize,
    pub snapshot_id: Option<i64>,
    pub transitions: usize,
}

/// The polling job driven by the scheduler
pub struct Pipeline {
    registry_path: PathBuf,
    collector: Collector,
    store: Arc<dyn SnapshotStore>,
    differ: StateDiffer,
    notifier: Notifier,
    offline: bool,
}

impl Pipeline {
    pub fn new(
        registry_path: PathBuf,
        collector: Collector,
        store: Arc<dyn SnapshotStore>,
        differ: StateDiffer,
        notifier: Notifier,
    ) -> Self {
        Pipeline {
            registry_path,
            collector,
            store,
            differ,
            notifier,
            offline: false,
        }
    }

    /// Skips snapshot persistence
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Reads the host registry
    ///
    /// A registry that cannot be read means no hosts for this cycle.
    async fn load_registry(&self) -> (Vec<HostDescriptor>, Option<Duration>) {
        let registry = match HostRegistry::load(&self.registry_path).await {
            Ok(registry) => registry,
            Err(e) => {
                error!("{}. Polling no hosts this cycle", e);
                return (Vec::new(), None);
            }
        };

        let interval = match registry.requested_interval() {
            Some(Ok(interval)) => Some(interval),
            Some(Err(e)) => {
                warn!("Ignoring registry interval: {}", e);
                None
            }
            None => None,
        };

        (registry.hosts, interval)
    }

    /// Starts appending the cycle's snapshot in the background
    ///
    /// The append runs alongside diffing and dispatch; its outcome is logged
    /// and collected at the end of the cycle.
    fn spawn_store(&self, result: &CollectionResult) -> Option<JoinHandle<Option<i64>>> {
        if self.offline {
            info!("Offline mode, snapshot not stored");
            return None;
        }

        let store = self.store.clone();
        let payload = result.clone();
        Some(tokio::spawn(async move {
            match store.append(&payload).await {
                Ok(id) => {
                    info!("Stored snapshot {}", id);
                    Some(id)
                }
                Err(e) => {
                    error!("Failed to store snapshot: {}", e);
                    None
                }
            }
        }))
    }

    /// Runs one full cycle
    pub async fn run_cycle(&mut self) -> (CycleReport, Option<Duration>) {
        let (hosts, interval) = self.load_registry().await;

        let result = self.collector.collect(&hosts).await;
        let failed_hosts = result.values().filter(|host| host.is_error()).count();

        let pending_store = self.spawn_store(&result);

        let transitions = self.differ.advance(&result).await;
        for transition in &transitions {
            self.notifier.dispatch(transition).await;
        }

        let snapshot_id = match pending_store {
            Some(task) => task.await.unwrap_or_else(|e| {
                error!("Snapshot task failed: {}", e);
                None
            }),
            None => None,
        };

        let report = CycleReport {
            hosts: result.len(),
            failed_hosts,
            snapshot_id,
            transitions: transitions.len(),
        };

        info!(
            "Cycle finished: {} host(s), {} failed, {} transition(s)",
            report.hosts, report.failed_hosts, report.transitions
        );

        (report, interval)
    }
}

#[async_trait]
impl PollJob for Pipeline {
    async fn poll(&mut self) -> Option<Duration> {
        let (_, interval) = self.run_cycle().await;
        interval
    }
}

/// Removes snapshots older than the retention window
pub struct RetentionJob {
    store: Arc<dyn SnapshotStore>,
}

impl RetentionJob {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        RetentionJob { store }
    }
}

#[async_trait]
impl CleanupJob for RetentionJob {
    async fn cleanup(&self) {
        let cutoff = retention_cutoff(Utc::now());
        match self.store.delete_older_than(cutoff).await {
            Ok(deleted) => info!("Removed {} snapshot(s) older than {}", deleted, cutoff),
            Err(e) => error!("Snapshot cleanup failed: {}", e),
        }
    }
}
