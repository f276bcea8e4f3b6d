// Configuration module - host registry and polling interval handling
//
// This module is responsible for:
// 1. Loading the host registry (the list of Docker hosts to poll) from disk
// 2. Parsing human-readable interval strings such as "5m" or "6h20m"
// 3. Validating polling intervals before they reach the scheduler

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default Docker Engine API port used when a host entry omits one
pub const DEFAULT_DOCKER_PORT: u16 = 2375;

/// Default polling interval (5 minutes)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Smallest polling interval accepted from configuration
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Largest polling interval accepted from configuration
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

static INTERVAL_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,5})([smh])").expect("Invalid interval regex"));

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read host registry {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid host registry format: {0}")]
    InvalidRegistry(#[from] serde_json::Error),

    #[error("Interval must be between 5 minutes and 6 hours, got {0:?}")]
    IntervalOutOfRange(Duration),
}

/// A single Docker host to poll
///
/// # Example registry entry
/// ```json
/// { "name": "nas", "url": "192.168.1.10", "port": 2375 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// Unique display name, used as the key in collection results
    pub name: String,

    /// Hostname or IP address of the Docker Engine API
    pub url: String,

    /// TCP port of the Docker Engine API
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_DOCKER_PORT
}

impl HostDescriptor {
    /// Base address of the Docker Engine API for this host
    pub fn address(&self) -> String {
        format!("http://{}:{}", self.url, self.port)
    }
}

/// Host registry as stored on disk
///
/// The registry is re-read at the beginning of every polling cycle, so edits
/// take effect on the next cycle without a restart.
///
/// # Example
/// ```json
/// {
///   "hosts": [
///     { "name": "localhost", "url": "127.0.0.1", "port": 2375 }
///   ],
///   "interval": "10m"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRegistry {
    /// Hosts in the order they should appear in results
    #[serde(default)]
    pub hosts: Vec<HostDescriptor>,

    /// Optional polling interval override, e.g. "5m" or "1h30m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl HostRegistry {
    /// Loads the registry from a JSON file
    ///
    /// # Returns
    /// * `Ok(HostRegistry)` - Successfully parsed registry
    /// * `Err(ConfigError)` - File missing, unreadable or malformed
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let registry: HostRegistry = serde_json::from_str(&raw)?;
        debug!(
            "Loaded host registry from {} with {} host(s)",
            path.display(),
            registry.hosts.len()
        );

        Ok(registry)
    }

    /// Returns the validated polling interval requested by the registry, if any
    pub fn requested_interval(&self) -> Option<Result<Duration, ConfigError>> {
        self.interval
            .as_deref()
            .map(|raw| validate_interval(parse_interval(raw)))
    }
}

/// Parses an interval string into a duration
///
/// Every `<number><unit>` pair is summed, where unit is one of `s`, `m`, `h`
/// and number has at most five digits. Characters that do not belong to
/// such a pair are ignored, so `"5 minutes"` parses as 5 minutes and
/// `"abc"` parses as zero.
///
/// # Examples
/// ```
/// use dockstat_collector::config::parse_interval;
/// use std::time::Duration;
///
/// assert_eq!(parse_interval("300s"), Duration::from_millis(300_000));
/// assert_eq!(parse_interval("6h20m"), Duration::from_millis(6 * 3_600_000 + 20 * 60_000));
/// ```
pub fn parse_interval(raw: &str) -> Duration {
    let millis: u64 = INTERVAL_PART
        .captures_iter(raw)
        .filter_map(|caps| {
            let value: u64 = caps[1].parse().ok()?;
            let unit = match &caps[2] {
                "s" => 1_000,
                "m" => 60_000,
                "h" => 3_600_000,
                _ => return None,
            };
            Some(value * unit)
        })
        .sum();

    Duration::from_millis(millis)
}

/// Rejects intervals outside of the supported 5 minute to 6 hour range
pub fn validate_interval(interval: Duration) -> Result<Duration, ConfigError> {
    if interval < MIN_POLL_INTERVAL || interval > MAX_POLL_INTERVAL {
        return Err(ConfigError::IntervalOutOfRange(interval));
    }
    info!("Accepted polling interval of {}s", interval.as_secs());
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("300s"), Duration::from_millis(300_000));
        assert_eq!(parse_interval("5m"), Duration::from_millis(300_000));
        assert_eq!(
            parse_interval("6h20m"),
            Duration::from_millis(6 * 3_600_000 + 20 * 60_000)
        );
    }

    #[test]
    fn test_parse_interval_ignores_garbage() {
        assert_eq!(parse_interval("10m and some text"), Duration::from_secs(600));
        assert_eq!(parse_interval("1h-30m"), Duration::from_secs(5400));
        assert_eq!(parse_interval("abc"), Duration::ZERO);
        assert_eq!(parse_interval("12d"), Duration::ZERO);
    }

    #[test]
    fn test_validate_interval_bounds() {
        assert!(validate_interval(Duration::from_secs(5 * 60)).is_ok());
        assert!(validate_interval(Duration::from_secs(6 * 60 * 60)).is_ok());
        assert!(validate_interval(Duration::from_secs(60)).is_err());
        assert!(validate_interval(Duration::from_secs(6 * 60 * 60 + 1)).is_err());
    }

    #[tokio::test]
    async fn test_load_registry_with_default_port() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"hosts": [{{"name": "a", "url": "10.0.0.1"}}, {{"name": "b", "url": "10.0.0.2", "port": 2376}}], "interval": "10m"}}"#
        )
        .unwrap();

        let registry = HostRegistry::load(file.path()).await.unwrap();

        assert_eq!(registry.hosts.len(), 2);
        assert_eq!(registry.hosts[0].port, DEFAULT_DOCKER_PORT);
        assert_eq!(registry.hosts[1].address(), "http://10.0.0.2:2376");
        assert_eq!(
            registry.requested_interval().unwrap().unwrap(),
            Duration::from_secs(600)
        );
    }

    #[tokio::test]
    async fn test_load_registry_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = HostRegistry::load(&dir.path().join("missing.json")).await;
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
