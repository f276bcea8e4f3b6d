// Runtime module - the seam between the collector and a container runtime
//
// The collector never talks to Docker directly. It consumes the
// `RuntimeClient` trait, which keeps the wire protocol out of the core and
// lets tests substitute an in-memory runtime.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::HostDescriptor;

pub mod docker;
#[cfg(test)]
pub(crate) mod testing;

pub use docker::DockerRuntimeClient;

/// Lifecycle state reported for containers that are up
pub const STATE_RUNNING: &str = "running";

/// Lifecycle state reported for containers that have stopped
pub const STATE_EXITED: &str = "exited";

/// Errors returned by a runtime client call
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Request to {host} timed out after {timeout_secs}s")]
    Timeout { host: String, timeout_secs: u64 },

    #[error("Runtime returned an incomplete response: {0}")]
    InvalidResponse(String),
}

/// A container as reported by the runtime's list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub id: String,
    pub name: String,
    pub state: String,
}

impl ContainerDescriptor {
    pub fn is_running(&self) -> bool {
        self.state == STATE_RUNNING
    }
}

/// One pair of cumulative CPU readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    /// Total CPU time consumed by the container, in nanoseconds
    pub total_usage: u64,
    /// Total CPU time of the host, in nanoseconds
    pub system_usage: u64,
}

/// Cumulative network byte counters summed over all interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Raw counters for a single container, as returned by one stats call
///
/// `cpu` and `precpu` both come from the same response: the runtime reports
/// the current reading alongside the one taken just before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawContainerSample {
    pub host_name: String,
    pub container_id: String,
    pub container_name: String,
    pub state: String,
    pub cpu: CpuCounters,
    pub precpu: CpuCounters,
    /// Online CPU count, `None` when the runtime omits it
    pub online_cpus: Option<u64>,
    pub memory_usage: u64,
    pub memory_limit: u64,
    /// `None` when the container reports no interface data
    pub network: Option<NetworkCounters>,
}

/// Subset of the container inspect response the collector needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInspect {
    pub network_mode: String,
}

impl ContainerInspect {
    /// Host-networked containers share the host's interfaces, so their
    /// counters are not attributable to the container.
    pub fn uses_host_network(&self) -> bool {
        self.network_mode == "host"
    }
}

/// Capability to query a container runtime on a remote host
///
/// Every call may fail independently with a transport or API error.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Lists containers on the host, including stopped ones when `all` is set
    async fn list_containers(
        &self,
        host: &HostDescriptor,
        all: bool,
    ) -> Result<Vec<ContainerDescriptor>, RuntimeError>;

    /// Fetches a one-shot stats sample for a container
    async fn stats(
        &self,
        host: &HostDescriptor,
        container: &ContainerDescriptor,
    ) -> Result<RawContainerSample, RuntimeError>;

    /// Inspects a container's configuration
    async fn inspect(
        &self,
        host: &HostDescriptor,
        container_id: &str,
    ) -> Result<ContainerInspect, RuntimeError>;
}
