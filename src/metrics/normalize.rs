// Metric normalizer
//
// Turns cumulative counters into usage values:
// - CPU: intra-call delta between the current and previous reading of one
//   stats response
// - Network: cross-cycle delta against the last cumulative value seen for
//   the container, kept in a `SampleCache`

use std::collections::HashMap;

use super::NormalizedMetric;
use crate::runtime::{CpuCounters, NetworkCounters, RawContainerSample};

/// Scale applied to the CPU usage fraction
pub const CPU_USAGE_SCALE: f64 = 1_000_000_000.0;

/// Calculates the CPU usage fraction from one stats response
///
/// # Formula
/// fraction = (cpu_delta / system_delta) * online_cpus
///
/// Returns 0 when the system delta is not positive. A negative container
/// delta (counter reset) is treated as 0.
pub fn cpu_fraction(cpu: CpuCounters, precpu: CpuCounters, online_cpus: Option<u64>) -> f64 {
    let system_delta = cpu.system_usage as f64 - precpu.system_usage as f64;
    if system_delta <= 0.0 {
        return 0.0;
    }

    let cpu_delta = (cpu.total_usage as f64 - precpu.total_usage as f64).max(0.0);
    let cpus = online_cpus.unwrap_or_else(|| num_cpus::get() as u64) as f64;

    (cpu_delta / system_delta) * cpus
}

/// CPU usage fraction scaled to the nanosecond-equivalent unit used in snapshots
pub fn cpu_usage(sample: &RawContainerSample) -> f64 {
    cpu_fraction(sample.cpu, sample.precpu, sample.online_cpus) * CPU_USAGE_SCALE
}

/// Network totals and deltas for one container in one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkUsage {
    pub rx_total: u64,
    pub tx_total: u64,
    pub rx_delta: u64,
    pub tx_delta: u64,
}

/// Last cumulative network counters seen per container id
///
/// Entries are overwritten every cycle and never expire, so containers that
/// disappear leave their last reading behind for the life of the process.
#[derive(Debug, Default)]
pub struct SampleCache {
    entries: HashMap<String, NetworkCounters>,
}

impl SampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, container_id: &str) -> Option<NetworkCounters> {
        self.entries.get(container_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Computes the delta against the cached reading and stores the new one
    ///
    /// On first observation there is no cached reading, so the delta equals
    /// the full cumulative total. Containers without interface data report
    /// zeros and leave the cache untouched.
    pub fn observe(&mut self, container_id: &str, counters: Option<NetworkCounters>) -> NetworkUsage {
        let Some(now) = counters else {
            return NetworkUsage::default();
        };

        let previous = self.get(container_id).unwrap_or_default();
        self.entries.insert(container_id.to_string(), now);

        NetworkUsage {
            rx_total: now.rx_bytes,
            tx_total: now.tx_bytes,
            rx_delta: now.rx_bytes.saturating_sub(previous.rx_bytes),
            tx_delta: now.tx_bytes.saturating_sub(previous.tx_bytes),
        }
    }
}

/// Builds the normalized metric for a running container
///
/// `host_network` marks containers sharing the host's network namespace;
/// their interface counters are discarded.
pub fn normalize(
    sample: &RawContainerSample,
    network_mode: &str,
    host_network: bool,
    cache: &mut SampleCache,
) -> NormalizedMetric {
    let counters = if host_network { None } else { sample.network };
    let network = cache.observe(&sample.container_id, counters);

    NormalizedMetric {
        host_name: sample.host_name.clone(),
        container_id: sample.container_id.clone(),
        container_name: sample.container_name.clone(),
        state: sample.state.clone(),
        cpu_usage: cpu_usage(sample),
        memory_usage: sample.memory_usage,
        memory_limit: sample.memory_limit,
        network_rx_total: network.rx_total,
        network_tx_total: network.tx_total,
        network_rx_delta: network.rx_delta,
        network_tx_delta: network.tx_delta,
        network_mode: network_mode.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, network: Option<NetworkCounters>) -> RawContainerSample {
        RawContainerSample {
            host_name: "a".to_string(),
            container_id: id.to_string(),
            container_name: format!("{}-name", id),
            state: "running".to_string(),
            cpu: CpuCounters {
                total_usage: 300,
                system_usage: 2_000,
            },
            precpu: CpuCounters {
                total_usage: 100,
                system_usage: 1_000,
            },
            online_cpus: Some(2),
            memory_usage: 512,
            memory_limit: 1024,
            network,
        }
    }

    #[test]
    fn test_cpu_fraction() {
        let s = sample("c1", None);
        // (200 / 1000) * 2
        assert!((cpu_fraction(s.cpu, s.precpu, s.online_cpus) - 0.4).abs() < 1e-12);
        assert!((cpu_usage(&s) - 0.4 * CPU_USAGE_SCALE).abs() < 1e-3);
    }

    #[test]
    fn test_cpu_fraction_zero_system_delta() {
        let counters = CpuCounters {
            total_usage: 500,
            system_usage: 1_000,
        };
        let precpu = CpuCounters {
            total_usage: 100,
            system_usage: 1_000,
        };

        let fraction = cpu_fraction(counters, precpu, Some(4));

        assert_eq!(fraction, 0.0);
        assert!(!fraction.is_nan());
    }

    #[test]
    fn test_cpu_fraction_counter_reset() {
        let cpu = CpuCounters {
            total_usage: 10,
            system_usage: 2_000,
        };
        let precpu = CpuCounters {
            total_usage: 100,
            system_usage: 1_000,
        };
        assert_eq!(cpu_fraction(cpu, precpu, Some(1)), 0.0);
    }

    #[test]
    fn test_first_observation_reports_full_total() {
        let mut cache = SampleCache::new();
        let counters = NetworkCounters {
            rx_bytes: 1_000,
            tx_bytes: 400,
        };

        let usage = cache.observe("c1", Some(counters));

        assert_eq!(usage.rx_delta, 1_000);
        assert_eq!(usage.tx_delta, 400);
        assert_eq!(cache.get("c1"), Some(counters));
    }

    #[test]
    fn test_second_observation_reports_delta() {
        let mut cache = SampleCache::new();
        cache.observe(
            "c1",
            Some(NetworkCounters {
                rx_bytes: 1_000,
                tx_bytes: 400,
            }),
        );

        let usage = cache.observe(
            "c1",
            Some(NetworkCounters {
                rx_bytes: 1_500,
                tx_bytes: 450,
            }),
        );

        assert_eq!(usage.rx_total, 1_500);
        assert_eq!(usage.rx_delta, 500);
        assert_eq!(usage.tx_delta, 50);
    }

    #[test]
    fn test_missing_interfaces_leave_cache_untouched() {
        let mut cache = SampleCache::new();
        let usage = cache.observe("c1", None);

        assert_eq!(usage, NetworkUsage::default());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_normalize_host_network_reports_zero() {
        let mut cache = SampleCache::new();
        let s = sample(
            "c1",
            Some(NetworkCounters {
                rx_bytes: 9_000,
                tx_bytes: 9_000,
            }),
        );

        let metric = normalize(&s, "host", true, &mut cache);

        assert_eq!(metric.network_rx_total, 0);
        assert_eq!(metric.network_rx_delta, 0);
        assert_eq!(metric.memory_usage, 512);
        assert!(cache.get("c1").is_none());
    }
}
