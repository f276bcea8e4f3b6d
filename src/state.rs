// State module - container state tracking between cycles
//
// Each cycle is reduced to a generation of `ContainerStateRecord`s and
// compared against the previous generation. The comparison yields the
// transitions that notifications are sent for.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::CollectionResult;
use crate::runtime::{STATE_EXITED, STATE_RUNNING};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Identity and lifecycle state of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStateRecord {
    #[serde(rename = "id")]
    pub container_id: String,

    #[serde(rename = "name")]
    pub container_name: String,

    #[serde(rename = "host")]
    pub host_name: String,

    pub state: String,
}

/// Key of a record within a generation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerKey {
    pub host_name: String,
    pub container_id: String,
}

/// All records of one cycle, at most one per (host, container id)
pub type Generation = HashMap<ContainerKey, ContainerStateRecord>;

/// What happened to a container between two generations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    Added,
    Removed,
    StateChanged { from: String, to: String },
    /// State change into `exited`
    Exited { from: String },
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Added => write!(f, "added"),
            TransitionKind::Removed => write!(f, "removed"),
            TransitionKind::StateChanged { from, to } => write!(f, "changed from {} to {}", from, to),
            TransitionKind::Exited { from } => write!(f, "exited (was {})", from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub container_id: String,
    pub container_name: String,
    pub host_name: String,
    pub kind: TransitionKind,
}

impl Transition {
    fn new(record: &ContainerStateRecord, kind: TransitionKind) -> Self {
        Transition {
            container_id: record.container_id.clone(),
            container_name: record.container_name.clone(),
            host_name: record.host_name.clone(),
            kind,
        }
    }

    /// Lifecycle state the container is in after this transition
    pub fn state(&self) -> &str {
        match &self.kind {
            TransitionKind::Added => STATE_RUNNING,
            TransitionKind::Removed => "removed",
            TransitionKind::StateChanged { to, .. } => to,
            TransitionKind::Exited { .. } => STATE_EXITED,
        }
    }
}

fn key_of(record: &ContainerStateRecord) -> ContainerKey {
    ContainerKey {
        host_name: record.host_name.clone(),
        container_id: record.container_id.clone(),
    }
}

/// Reduces a collection result to the generation used for diffing
///
/// Only running containers are tracked; anything else is represented by
/// its absence. Hosts reporting an error contribute no records here; see
/// `carry_forward_failed_hosts`.
pub fn project(result: &CollectionResult) -> Generation {
    result
        .values()
        .flat_map(|host| host.containers())
        .filter(|metric| metric.state == STATE_RUNNING)
        .map(|metric| {
            let record = ContainerStateRecord {
                container_id: metric.container_id.clone(),
                container_name: metric.container_name.clone(),
                host_name: metric.host_name.clone(),
                state: metric.state.clone(),
            };
            (key_of(&record), record)
        })
        .collect()
}

/// Keeps the previous records of hosts that reported an error this cycle
///
/// A host that could not be reached says nothing about its containers, so
/// they keep their last known state instead of turning into removals.
pub fn carry_forward_failed_hosts(
    previous: &Generation,
    result: &CollectionResult,
    current: &mut Generation,
) {
    for (host_name, host) in result {
        if !host.is_error() {
            continue;
        }
        let kept = previous
            .iter()
            .filter(|(key, _)| &key.host_name == host_name)
            .map(|(key, record)| (key.clone(), record.clone()));
        current.extend(kept);
    }
}

/// Classifies the transitions between two generations
///
/// Output is sorted by host then container id.
pub fn diff(previous: &Generation, current: &Generation) -> Vec<Transition> {
    let mut transitions: BTreeMap<&ContainerKey, Transition> = BTreeMap::new();

    for (key, before) in previous {
        match current.get(key) {
            None if before.state == STATE_RUNNING => {
                transitions.insert(key, Transition::new(before, TransitionKind::Removed));
            }
            None => {}
            Some(after) if after.state != before.state => {
                let kind = if after.state == STATE_EXITED {
                    TransitionKind::Exited {
                        from: before.state.clone(),
                    }
                } else {
                    TransitionKind::StateChanged {
                        from: before.state.clone(),
                        to: after.state.clone(),
                    }
                };
                transitions.insert(key, Transition::new(after, kind));
            }
            Some(_) => {}
        }
    }

    for (key, after) in current {
        if !previous.contains_key(key) {
            transitions.insert(key, Transition::new(after, TransitionKind::Added));
        }
    }

    transitions.into_values().collect()
}

/// On-disk layout: host name to the records of that host
type StateFile = BTreeMap<String, Vec<ContainerStateRecord>>;

/// Tracks the previous generation and diffs each new cycle against it
///
/// When a state file is configured, the previous generation survives
/// restarts: it is loaded at startup and rewritten whenever it changes.
pub struct StateDiffer {
    previous: Generation,
    state_file: Option<PathBuf>,
}

impl StateDiffer {
    /// Differ with empty in-memory state
    pub fn new() -> Self {
        StateDiffer {
            previous: Generation::new(),
            state_file: None,
        }
    }

    /// Differ bootstrapped from a state file
    ///
    /// A missing or malformed file yields empty state.
    pub async fn with_state_file(path: PathBuf) -> Self {
        let previous = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Generation::new(),
            Ok(raw) => match serde_json::from_str::<StateFile>(&raw) {
                Ok(file) => Self::from_state_file(file),
                Err(e) => {
                    warn!("Ignoring malformed state file {}: {}", path.display(), e);
                    Generation::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Generation::new(),
            Err(e) => {
                warn!("Could not read state file {}: {}", path.display(), e);
                Generation::new()
            }
        };

        info!(
            "Loaded {} container state record(s) from {}",
            previous.len(),
            path.display()
        );

        StateDiffer {
            previous,
            state_file: Some(path),
        }
    }

    pub fn previous(&self) -> &Generation {
        &self.previous
    }

    /// Diffs a cycle against the previous generation and makes it the new
    /// previous generation
    pub async fn advance(&mut self, result: &CollectionResult) -> Vec<Transition> {
        let mut current = project(result);
        carry_forward_failed_hosts(&self.previous, result, &mut current);
        let transitions = diff(&self.previous, &current);
        let changed = current != self.previous;

        self.previous = current;

        if changed {
            if let Some(path) = &self.state_file {
                match write_state_file(path, &self.previous).await {
                    Ok(()) => info!("Container states saved to {}", path.display()),
                    Err(e) => warn!("{}", e),
                }
            }
        } else {
            debug!("No state change detected");
        }

        transitions
    }

    fn from_state_file(file: StateFile) -> Generation {
        file.into_values()
            .flatten()
            .map(|record| (key_of(&record), record))
            .collect()
    }
}

impl Default for StateDiffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes the generation next to its destination, then renames it into place
async fn write_state_file(path: &Path, generation: &Generation) -> Result<(), StateError> {
    let mut file = StateFile::new();
    for record in generation.values() {
        file.entry(record.host_name.clone())
            .or_default()
            .push(record.clone());
    }
    for records in file.values_mut() {
        records.sort_by(|a, b| a.container_id.cmp(&b.container_id));
    }

    let json = serde_json::to_string_pretty(&file)?;
    let tmp = path.with_extension("tmp");
    let io_error = |source| StateError::Write {
        path: path.display().to_string(),
        source,
    };

    tokio::fs::write(&tmp, json).await.map_err(io_error)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_error)
}
