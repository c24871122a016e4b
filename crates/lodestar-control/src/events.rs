//! Live deployment event fan-out.
//!
//! Process-wide, many-writer/many-reader bus. Events are informational, not
//! a synchronisation primitive: subscribers must tolerate seeing ADDED and
//! UPDATED for the same deployment in either order relative to their own
//! reads, and publication only happens after the store write was
//! acknowledged.

use tokio::sync::broadcast;
use tracing::debug;

use crate::config::EventConfig;
use crate::types::{Deployment, EnvironmentId};

/// What happened to the deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A deployment record was created.
    Added,
    /// A deployment record was mutated.
    Updated,
}

/// A single fan-out event.
#[derive(Debug, Clone)]
pub struct DeploymentEvent {
    /// What happened.
    pub kind: EventKind,
    /// The deployment after the write (and after enrichment).
    pub deployment: Deployment,
}

/// Broadcast bus for deployment events.
///
/// Injected into the orchestrator so tests can observe publications.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeploymentEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Fire-and-forget: a bus with no subscribers simply
    /// drops the event.
    pub fn publish(&self, kind: EventKind, deployment: Deployment) {
        debug!(
            deployment_id = %deployment.id,
            environment_id = %deployment.environment_id,
            kind = ?kind,
            "publishing deployment event"
        );
        let _ = self.sender.send(DeploymentEvent { kind, deployment });
    }

    /// Subscribe to events for one environment.
    #[must_use]
    pub fn subscribe(&self, environment_id: EnvironmentId) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            environment_id,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl From<&EventConfig> for EventBus {
    fn from(config: &EventConfig) -> Self {
        Self::new(config.capacity)
    }
}

/// A live, unbounded sequence of deployment events for one environment.
///
/// Not restartable; ends only when the subscriber drops it or the bus goes
/// away. Slow subscribers that lag behind the channel skip ahead rather
/// than erroring out.
#[derive(Debug)]
pub struct EventStream {
    receiver: broadcast::Receiver<DeploymentEvent>,
    environment_id: EnvironmentId,
}

impl EventStream {
    /// The next event for this stream's environment, or `None` once the bus
    /// has shut down.
    pub async fn next(&mut self) -> Option<DeploymentEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.deployment.environment_id == self.environment_id => {
                    return Some(event);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeploymentId, DeploymentStatus};

    fn test_deployment(environment: &str) -> Deployment {
        Deployment {
            id: DeploymentId::generate(),
            name: "build-1".to_owned(),
            status: DeploymentStatus::New,
            environment_id: EnvironmentId::new(environment),
            remote_id: None,
            created: Some(chrono::Utc::now()),
            started: None,
            completed: None,
            build_log: None,
        }
    }

    #[tokio::test]
    async fn streams_are_filtered_by_environment() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe(EnvironmentId::new("env-1"));

        bus.publish(EventKind::Added, test_deployment("env-2"));
        bus.publish(EventKind::Updated, test_deployment("env-1"));

        let event = stream.next().await.expect("stream ended");
        assert_eq!(event.kind, EventKind::Updated);
        assert_eq!(event.deployment.environment_id.as_str(), "env-1");
    }

    #[tokio::test]
    async fn stream_ends_when_bus_dropped() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe(EnvironmentId::new("env-1"));
        drop(bus);

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish(EventKind::Added, test_deployment("env-1"));
    }

    #[tokio::test]
    async fn bus_built_from_config() {
        let bus = EventBus::from(&EventConfig { capacity: 4 });
        let mut stream = bus.subscribe(EnvironmentId::new("env-1"));

        bus.publish(EventKind::Added, test_deployment("env-1"));
        let event = stream.next().await.expect("stream ended");
        assert_eq!(event.kind, EventKind::Added);
    }
}
