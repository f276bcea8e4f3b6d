// Docker runtime client
//
// Talks to remote Docker Engine APIs over plain HTTP using bollard.
// One client is kept per host address and reused across cycles.

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, Stats, StatsOptions,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use dashmap::DashMap;
use futures_util::stream::StreamExt;
use std::time::Duration;
use tracing::debug;

use super::{
    ContainerDescriptor, ContainerInspect, CpuCounters, NetworkCounters, RawContainerSample,
    RuntimeClient, RuntimeError,
};
use crate::config::HostDescriptor;

/// Runtime client backed by the Docker Engine API
///
/// # Requirements
/// - Each host must expose the Docker API over TCP (e.g. `tcp://0.0.0.0:2375`)
/// - Connections are unauthenticated HTTP, as with `DOCKER_HOST=tcp://...`
pub struct DockerRuntimeClient {
    /// Connected clients keyed by host address
    clients: DashMap<String, Docker>,

    /// Per-request timeout handed to bollard
    timeout: Duration,
}

impl DockerRuntimeClient {
    pub fn new(timeout: Duration) -> Self {
        DockerRuntimeClient {
            clients: DashMap::new(),
            timeout,
        }
    }

    /// Returns the cached client for a host, connecting on first use
    fn client(&self, host: &HostDescriptor) -> Result<Docker, RuntimeError> {
        let address = host.address();
        if let Some(docker) = self.clients.get(&address) {
            return Ok(docker.clone());
        }

        debug!("Creating Docker client for host {} at {}", host.name, address);
        let docker = Docker::connect_with_http(&address, self.timeout.as_secs(), API_DEFAULT_VERSION)?;
        self.clients.insert(address, docker.clone());
        Ok(docker)
    }

    /// Sums byte counters over every interface the container reports
    fn network_counters(stats: &Stats) -> Option<NetworkCounters> {
        let networks = stats.networks.as_ref()?;
        if networks.is_empty() {
            return None;
        }

        Some(networks.values().fold(NetworkCounters::default(), |acc, net| {
            NetworkCounters {
                rx_bytes: acc.rx_bytes + net.rx_bytes,
                tx_bytes: acc.tx_bytes + net.tx_bytes,
            }
        }))
    }

    fn into_sample(
        host: &HostDescriptor,
        container: &ContainerDescriptor,
        stats: &Stats,
    ) -> RawContainerSample {
        RawContainerSample {
            host_name: host.name.clone(),
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            state: container.state.clone(),
            cpu: CpuCounters {
                total_usage: stats.cpu_stats.cpu_usage.total_usage,
                system_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            },
            precpu: CpuCounters {
                total_usage: stats.precpu_stats.cpu_usage.total_usage,
                system_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            },
            online_cpus: stats.cpu_stats.online_cpus,
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            network: Self::network_counters(stats),
        }
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntimeClient {
    async fn list_containers(
        &self,
        host: &HostDescriptor,
        all: bool,
    ) -> Result<Vec<ContainerDescriptor>, RuntimeError> {
        let docker = self.client(host)?;
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };

        let summaries = docker.list_containers(Some(options)).await?;
        debug!("Host {} reported {} container(s)", host.name, summaries.len());

        Ok(summaries
            .into_iter()
            .map(|summary| ContainerDescriptor {
                id: summary.id.unwrap_or_default(),
                name: summary
                    .names
                    .and_then(|names| names.first().map(|n| n.trim_start_matches('/').to_string()))
                    .unwrap_or_else(|| "unknown".to_string()),
                state: summary.state.unwrap_or_else(|| "unknown".to_string()),
            })
            .collect())
    }

    async fn stats(
        &self,
        host: &HostDescriptor,
        container: &ContainerDescriptor,
    ) -> Result<RawContainerSample, RuntimeError> {
        let docker = self.client(host)?;

        // Single snapshot; the daemon fills precpu_stats from its previous read
        let options = StatsOptions {
            stream: false,
            ..Default::default()
        };

        let mut stream = docker.stats(&container.id, Some(options));
        match stream.next().await {
            Some(stats) => Ok(Self::into_sample(host, container, &stats?)),
            None => Err(RuntimeError::InvalidResponse(format!(
                "empty stats stream for container {}",
                container.id
            ))),
        }
    }

    async fn inspect(
        &self,
        host: &HostDescriptor,
        container_id: &str,
    ) -> Result<ContainerInspect, RuntimeError> {
        let docker = self.client(host)?;
        let response = docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;

        Ok(ContainerInspect {
            network_mode: response
                .host_config
                .and_then(|config| config.network_mode)
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_cached_per_address() {
        let runtime = DockerRuntimeClient::new(Duration::from_secs(5));
        let host = HostDescriptor {
            name: "local".to_string(),
            url: "127.0.0.1".to_string(),
            port: 2375,
        };

        runtime.client(&host).unwrap();
        runtime.client(&host).unwrap();

        assert_eq!(runtime.clients.len(), 1);
    }
}
