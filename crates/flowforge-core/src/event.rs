//! Broadcast bus for [`EngineEvent`]s.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no subscribers is a
//! no-op, so the orchestrator publishes unconditionally.

use flowforge_types::event::EngineEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::TaskDispatched {
            execution_id: Uuid::nil(),
            task: "a".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::TaskDispatched { task, .. } if task == "a"));
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        EventBus::new(8).publish(EngineEvent::ExecutionFinished {
            execution_id: Uuid::nil(),
            status: flowforge_types::execution::ExecutionStatus::Completed,
        });
    }
}
