//! Domain events, produced over a broadcast channel.
//! Grounded on the reference codebase's `daemon/src/events.rs`
//! (tagged-enum-over-`tokio::sync::broadcast`), narrowed to this core's
//! five events.

use crate::model::TaskStatus;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum DomainEvent {
    TaskStatusChanged {
        task_id: String,
        from_status: Option<TaskStatus>,
        to_status: Option<TaskStatus>,
    },
    AutomationTaskStarted {
        task_id: String,
    },
    AutomationTaskEnded {
        task_id: String,
    },
    AutomationAgentAttached {
        task_id: String,
    },
    AutomationReviewAgentAttached {
        task_id: String,
    },
}

/// Broadcast-backed event bus. Cloning is cheap (it clones the sender
/// handle); every clone publishes to the same set of subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Best-effort publish: if there are no subscribers this is a no-op
    /// (broadcast::Sender::send only errors when there are zero receivers).
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}
