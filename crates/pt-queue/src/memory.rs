use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use pt_common::EntityEvent;

use crate::{EventPublisher, Result};

const DEFAULT_CAPACITY: usize = 1024;

/// Process-local transport.
///
/// Events go to every current subscriber; publishing with no subscribers is
/// not an error, the event is simply dropped.
pub struct InMemoryBus {
    name: String,
    sender: broadcast::Sender<EntityEvent>,
    published: AtomicU64,
}

impl InMemoryBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            sender,
            published: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }

    /// Total events accepted since creation
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &EntityEvent) -> Result<()> {
        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            bus = %self.name,
            kind = event.kind.as_str(),
            entity_type = %event.entity_type_name,
            receivers,
            "Event published in-process"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pt_common::EntityEventKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = InMemoryBus::new("test");
        let mut rx = bus.subscribe();

        let event = EntityEvent::new(EntityEventKind::EntityUpdated, "Role", "r-1", json!({"id": "r-1"}));
        bus.publish(&event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = InMemoryBus::new("lonely");
        let event = EntityEvent::new(EntityEventKind::EntityDeleted, "Role", "r-1", json!({}));
        assert!(bus.publish(&event).await.is_ok());
        assert_eq!(bus.published_count(), 1);
    }
}
