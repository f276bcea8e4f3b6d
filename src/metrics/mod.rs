// Metrics module - normalized container metrics and their collection
//
// Raw cumulative counters come in from a `RuntimeClient`, go through the
// normalizer (CPU and network deltas) and leave as one `HostResult` per host.
// The combined `CollectionResult` is what gets stored as a snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod collector;
pub mod normalize;

pub use collector::{Collector, DEFAULT_HOST_TIMEOUT};
pub use normalize::SampleCache;

use crate::runtime::ContainerDescriptor;

/// Point-in-time metrics for a single container
///
/// Field names on the wire match the snapshot format consumed by the
/// dashboard (`cpu_usage`, `mem_usage`, `current_net_rx`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetric {
    #[serde(rename = "hostName")]
    pub host_name: String,

    #[serde(rename = "id")]
    pub container_id: String,

    #[serde(rename = "name")]
    pub container_name: String,

    pub state: String,

    /// CPU usage fraction scaled by 1e9
    pub cpu_usage: f64,

    #[serde(rename = "mem_usage")]
    pub memory_usage: u64,

    #[serde(rename = "mem_limit")]
    pub memory_limit: u64,

    /// Cumulative bytes received
    #[serde(rename = "net_rx")]
    pub network_rx_total: u64,

    /// Cumulative bytes transmitted
    #[serde(rename = "net_tx")]
    pub network_tx_total: u64,

    /// Bytes received since the previous cycle
    #[serde(rename = "current_net_rx")]
    pub network_rx_delta: u64,

    /// Bytes transmitted since the previous cycle
    #[serde(rename = "current_net_tx")]
    pub network_tx_delta: u64,

    #[serde(rename = "networkMode")]
    pub network_mode: String,
}

impl NormalizedMetric {
    /// All-zero metric for a container whose counters are unavailable or
    /// meaningless (stopped, or the stats call failed)
    pub fn zeroed(host_name: &str, container: &ContainerDescriptor, network_mode: &str) -> Self {
        NormalizedMetric {
            host_name: host_name.to_string(),
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            state: container.state.clone(),
            cpu_usage: 0.0,
            memory_usage: 0,
            memory_limit: 0,
            network_rx_total: 0,
            network_tx_total: 0,
            network_rx_delta: 0,
            network_tx_delta: 0,
            network_mode: network_mode.to_string(),
        }
    }
}

/// Outcome of collecting one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostResult {
    /// Metrics in the order the runtime listed the containers
    Containers(Vec<NormalizedMetric>),

    /// The host could not be collected
    Error { error: String },
}

impl HostResult {
    pub fn error(message: impl Into<String>) -> Self {
        HostResult::Error {
            error: message.into(),
        }
    }

    pub fn containers(&self) -> &[NormalizedMetric] {
        match self {
            HostResult::Containers(metrics) => metrics,
            HostResult::Error { .. } => &[],
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, HostResult::Error { .. })
    }
}

/// Results of one collection cycle keyed by host name
pub type CollectionResult = BTreeMap<String, HostResult>;
