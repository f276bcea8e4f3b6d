// In-memory runtime used by collector and pipeline tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    ContainerDescriptor, ContainerInspect, CpuCounters, NetworkCounters, RawContainerSample,
    RuntimeClient, RuntimeError,
};
use crate::config::HostDescriptor;

#[derive(Clone)]
pub(crate) struct FakeContainer {
    descriptor: ContainerDescriptor,
    sample: Option<RawContainerSample>,
    network_mode: String,
    stats_hang: bool,
}

impl FakeContainer {
    pub(crate) fn running(id: &str, host: &str) -> Self {
        Self::with_state(id, host, "running")
    }

    pub(crate) fn with_state(id: &str, host: &str, state: &str) -> Self {
        let descriptor = ContainerDescriptor {
            id: id.to_string(),
            name: format!("{}-name", id),
            state: state.to_string(),
        };
        let sample = RawContainerSample {
            host_name: host.to_string(),
            container_id: id.to_string(),
            container_name: descriptor.name.clone(),
            state: state.to_string(),
            cpu: CpuCounters {
                total_usage: 2_000,
                system_usage: 20_000,
            },
            precpu: CpuCounters {
                total_usage: 1_000,
                system_usage: 10_000,
            },
            online_cpus: Some(1),
            memory_usage: 64,
            memory_limit: 128,
            network: None,
        };

        FakeContainer {
            descriptor,
            sample: Some(sample),
            network_mode: "bridge".to_string(),
            stats_hang: false,
        }
    }

    pub(crate) fn with_network(mut self, rx: u64, tx: u64) -> Self {
        if let Some(sample) = self.sample.as_mut() {
            sample.network = Some(NetworkCounters {
                rx_bytes: rx,
                tx_bytes: tx,
            });
        }
        self
    }

    pub(crate) fn with_network_mode(mut self, mode: &str) -> Self {
        self.network_mode = mode.to_string();
        self
    }

    pub(crate) fn failing_stats(mut self) -> Self {
        self.sample = None;
        self
    }

    /// Stats call that never returns
    pub(crate) fn hanging_stats(mut self) -> Self {
        self.stats_hang = true;
        self
    }
}

#[derive(Clone)]
pub(crate) enum FakeHost {
    Containers(Vec<FakeContainer>),
    Unreachable,
    Hanging,
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    hosts: Mutex<HashMap<String, FakeHost>>,
    stats_calls: AtomicUsize,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_host(&self, name: &str, host: FakeHost) {
        self.hosts.lock().unwrap().insert(name.to_string(), host);
    }

    pub(crate) fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    fn host(&self, name: &str) -> Option<FakeHost> {
        self.hosts.lock().unwrap().get(name).cloned()
    }

    fn container(&self, host: &str, id: &str) -> Option<FakeContainer> {
        match self.host(host)? {
            FakeHost::Containers(containers) => {
                containers.into_iter().find(|c| c.descriptor.id == id)
            }
            _ => None,
        }
    }
}

fn refused(host: &HostDescriptor) -> RuntimeError {
    RuntimeError::InvalidResponse(format!("connect ECONNREFUSED {}", host.address()))
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn list_containers(
        &self,
        host: &HostDescriptor,
        _all: bool,
    ) -> Result<Vec<ContainerDescriptor>, RuntimeError> {
        match self.host(&host.name) {
            Some(FakeHost::Containers(containers)) => {
                Ok(containers.into_iter().map(|c| c.descriptor).collect())
            }
            Some(FakeHost::Hanging) => std::future::pending().await,
            Some(FakeHost::Unreachable) | None => Err(refused(host)),
        }
    }

    async fn stats(
        &self,
        host: &HostDescriptor,
        container: &ContainerDescriptor,
    ) -> Result<RawContainerSample, RuntimeError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let fake = self.container(&host.name, &container.id);
        if fake.as_ref().is_some_and(|c| c.stats_hang) {
            return std::future::pending().await;
        }
        fake.and_then(|c| c.sample)
            .ok_or_else(|| RuntimeError::InvalidResponse("stats unavailable".to_string()))
    }

    async fn inspect(
        &self,
        host: &HostDescriptor,
        container_id: &str,
    ) -> Result<ContainerInspect, RuntimeError> {
        self.container(&host.name, container_id)
            .map(|c| ContainerInspect {
                network_mode: c.network_mode,
            })
            .ok_or_else(|| refused(host))
    }
}
