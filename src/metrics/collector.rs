// Collector - polls every configured host and normalizes what it finds
//
// Hosts are fetched concurrently, so one slow or unreachable host never
// holds up the others. The container listing and each container's sample
// have their own timeouts; a stalled container only loses its own metrics.
// Normalization happens after all fetches return, on the collector's own
// sample cache.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::normalize::{normalize, SampleCache};
use super::{CollectionResult, HostResult, NormalizedMetric};
use crate::config::HostDescriptor;
use crate::runtime::{
    ContainerDescriptor, ContainerInspect, RawContainerSample, RuntimeClient, RuntimeError,
};

/// Default time budget for collecting a single host
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(30);

/// What the runtime returned for one container
enum ContainerFetch {
    /// Not running, stats were not requested
    Skipped,
    Sampled {
        sample: RawContainerSample,
        inspect: ContainerInspect,
    },
    Failed,
}

/// Multi-host container collector
///
/// Owns the network `SampleCache`, so network deltas are computed against
/// whatever this collector saw on the previous cycle.
pub struct Collector {
    runtime: Arc<dyn RuntimeClient>,
    cache: SampleCache,
    host_timeout: Duration,
}

impl Collector {
    pub fn new(runtime: Arc<dyn RuntimeClient>, host_timeout: Duration) -> Self {
        Collector {
            runtime,
            cache: SampleCache::new(),
            host_timeout,
        }
    }

    pub fn cache(&self) -> &SampleCache {
        &self.cache
    }

    /// Collects all hosts and returns one result per host
    ///
    /// A host-level failure (unreachable, API error, timeout) becomes an
    /// error marker for that host only. A container whose stats call fails
    /// is reported with zeroed metrics.
    pub async fn collect(&mut self, hosts: &[HostDescriptor]) -> CollectionResult {
        let runtime = self.runtime.as_ref();
        let timeout = self.host_timeout;

        let fetches = join_all(
            hosts
                .iter()
                .map(|host| Self::fetch_host(runtime, host, timeout)),
        )
        .await;

        let mut result = CollectionResult::new();
        for (host, fetch) in hosts.iter().zip(fetches) {
            let host_result = match fetch {
                Ok(containers) => HostResult::Containers(
                    containers
                        .into_iter()
                        .map(|(container, fetch)| self.normalize_container(&host.name, container, fetch))
                        .collect(),
                ),
                Err(e) => {
                    error!("Error fetching containers for host {}: {}", host.name, e);
                    HostResult::error(format!("Error fetching containers: {}", e))
                }
            };

            if result.insert(host.name.clone(), host_result).is_some() {
                warn!("Duplicate host name '{}' in registry, keeping the last entry", host.name);
            }
        }

        result
    }

    fn normalize_container(
        &mut self,
        host_name: &str,
        container: ContainerDescriptor,
        fetch: ContainerFetch,
    ) -> NormalizedMetric {
        match fetch {
            ContainerFetch::Sampled { sample, inspect } => normalize(
                &sample,
                &inspect.network_mode,
                inspect.uses_host_network(),
                &mut self.cache,
            ),
            ContainerFetch::Skipped | ContainerFetch::Failed => {
                NormalizedMetric::zeroed(host_name, &container, "unknown")
            }
        }
    }

    /// Lists a host's containers and samples each running one
    ///
    /// `timeout` bounds the listing and, separately, each container. A
    /// container that runs out of time is reported as failed; only a listing
    /// that runs out of time fails the host.
    async fn fetch_host(
        runtime: &dyn RuntimeClient,
        host: &HostDescriptor,
        timeout: Duration,
    ) -> Result<Vec<(ContainerDescriptor, ContainerFetch)>, RuntimeError> {
        debug!("Now processing host: {}", host.name);
        let containers = tokio::time::timeout(timeout, runtime.list_containers(host, true))
            .await
            .map_err(|_| RuntimeError::Timeout {
                host: host.name.clone(),
                timeout_secs: timeout.as_secs(),
            })??;

        // join_all keeps the listing order
        let fetches = join_all(
            containers
                .iter()
                .map(|container| Self::fetch_container(runtime, host, container, timeout)),
        )
        .await;

        Ok(containers.into_iter().zip(fetches).collect())
    }

    async fn fetch_container(
        runtime: &dyn RuntimeClient,
        host: &HostDescriptor,
        container: &ContainerDescriptor,
        timeout: Duration,
    ) -> ContainerFetch {
        if !container.is_running() {
            return ContainerFetch::Skipped;
        }

        let fetched = tokio::time::timeout(
            timeout,
            futures_util::future::join(
                runtime.inspect(host, &container.id),
                runtime.stats(host, container),
            ),
        )
        .await;

        match fetched {
            Ok((Ok(inspect), Ok(sample))) => ContainerFetch::Sampled { sample, inspect },
            Ok((Err(e), _)) | Ok((_, Err(e))) => {
                error!(
                    "Error fetching details for container ID: {} on host: {} - {}",
                    container.id, host.name, e
                );
                ContainerFetch::Failed
            }
            Err(_) => {
                error!(
                    "Timed out after {}s fetching details for container ID: {} on host: {}",
                    timeout.as_secs(),
                    container.id,
                    host.name
                );
                ContainerFetch::Failed
            }
        }
    }
}
