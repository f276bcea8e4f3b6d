// Notify module - fans transitions out to notification channels
//
// A channel only receives a container id. The dispatcher records the
// transition in a shared `ContainerDirectory` first, so a channel can look
// up whatever it needs to render its message.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::state::{Transition, TransitionKind};

pub mod channels;
pub mod email;
pub mod template;

pub use channels::{ChannelKind, HttpChannel, WebhookService};
pub use email::{EmailChannel, EmailSettings};
pub use template::{MessageRenderer, Template};

/// Errors a channel can report for a single send
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("No notification data for container {0}")]
    UnknownContainer(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build email: {0}")]
    Email(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("{channel} API error ({status}): {body}")]
    Rejected {
        channel: String,
        status: u16,
        body: String,
    },
}

/// Latest transition per container id, shared with channel renderers
///
/// Entries live while their container is known; a container's entry is
/// dropped once its removal has been dispatched.
#[derive(Debug, Default)]
pub struct ContainerDirectory {
    entries: DashMap<String, Transition>,
}

impl ContainerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, transition: &Transition) {
        self.entries
            .insert(transition.container_id.clone(), transition.clone());
    }

    pub fn get(&self, container_id: &str) -> Option<Transition> {
        self.entries.get(container_id).map(|entry| entry.clone())
    }

    pub fn forget(&self, container_id: &str) {
        self.entries.remove(container_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A destination for container notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name used in logs, e.g. "discord"
    fn name(&self) -> &str;

    /// Sends a notification about a container
    async fn send(&self, container_id: &str) -> Result<(), NotifyError>;
}

/// Outcome of dispatching one transition
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Sends each transition to every enabled channel
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    directory: Arc<ContainerDirectory>,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, directory: Arc<ContainerDirectory>) -> Self {
        Notifier {
            channels,
            directory,
        }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Dispatches a transition to all channels concurrently
    ///
    /// A failing channel is logged and counted; it never stops the others.
    pub async fn dispatch(&self, transition: &Transition) -> DispatchReport {
        self.directory.record(transition);
        let report = self.fan_out(transition).await;

        if transition.kind == TransitionKind::Removed {
            self.directory.forget(&transition.container_id);
        }

        report
    }

    async fn fan_out(&self, transition: &Transition) -> DispatchReport {
        if self.channels.is_empty() {
            debug!(
                "No notification channels enabled, skipping {} ({})",
                transition.container_name, transition.kind
            );
            return DispatchReport::default();
        }

        let container_id = transition.container_id.as_str();
        let outcomes = join_all(self.channels.iter().map(|channel| async move {
            debug!("Sending notification via {} ({})", channel.name(), container_id);
            (channel.name(), channel.send(container_id).await)
        }))
        .await;

        let mut report = DispatchReport::default();
        for (channel, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    error!("Failed to send {} notification for {}: {}", channel, container_id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Notified {} channel(s) that container {} on {} {} ({} failed)",
            report.delivered, transition.container_name, transition.host_name, transition.kind, report.failed
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingChannel {
        name: String,
        fail: bool,
        directory: Arc<ContainerDirectory>,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new(name: &str, fail: bool, directory: Arc<ContainerDirectory>) -> Arc<Self> {
            Arc::new(RecordingChannel {
                name: name.to_string(),
                fail,
                directory,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, container_id: &str) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Rejected {
                    channel: self.name.clone(),
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let transition = self
                .directory
                .get(container_id)
                .ok_or_else(|| NotifyError::UnknownContainer(container_id.to_string()))?;
            self.sent.lock().unwrap().push(transition.container_name);
            Ok(())
        }
    }

    fn transition(id: &str) -> Transition {
        Transition {
            container_id: id.to_string(),
            container_name: format!("{}-name", id),
            host_name: "a".to_string(),
            kind: TransitionKind::Added,
        }
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_siblings() {
        let directory = Arc::new(ContainerDirectory::new());
        let first = RecordingChannel::new("first", false, directory.clone());
        let broken = RecordingChannel::new("broken", true, directory.clone());
        let last = RecordingChannel::new("last", false, directory.clone());
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![first.clone(), broken, last.clone()];
        let notifier = Notifier::new(channels, directory);

        let report = notifier.dispatch(&transition("c1")).await;

        assert_eq!(report, DispatchReport { delivered: 2, failed: 1 });
        assert_eq!(*first.sent.lock().unwrap(), vec!["c1-name".to_string()]);
        assert_eq!(*last.sent.lock().unwrap(), vec!["c1-name".to_string()]);
    }

    #[tokio::test]
    async fn test_removed_container_leaves_directory() {
        let directory = Arc::new(ContainerDirectory::new());
        let channel = RecordingChannel::new("rec", false, directory.clone());
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![channel.clone()];
        let notifier = Notifier::new(channels, directory.clone());

        notifier.dispatch(&transition("c1")).await;
        notifier.dispatch(&transition("c2")).await;
        let mut removed = transition("c1");
        removed.kind = TransitionKind::Removed;
        let report = notifier.dispatch(&removed).await;

        // The channel could still render the removal before the entry went away
        assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
        assert_eq!(channel.sent.lock().unwrap().len(), 3);
        assert!(directory.get("c1").is_none());
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_channels() {
        let directory = Arc::new(ContainerDirectory::new());
        let notifier = Notifier::new(Vec::new(), directory.clone());

        let report = notifier.dispatch(&transition("c1")).await;

        assert_eq!(report, DispatchReport::default());
        assert!(directory.get("c1").is_some());
        assert!(notifier.channel_names().is_empty());
    }
}
