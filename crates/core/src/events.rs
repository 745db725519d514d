//! Domain events and the process-wide publish/subscribe bus.
//!
//! The bus is owned by the composition root and passed by reference to every
//! component that publishes or listens. Handlers run synchronously on the
//! publisher's thread, so they must hand real work off (spawn a task, push
//! onto a channel) instead of blocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::transfers::{DownloadStatus, UploadStatus};

pub type SubscriptionId = u64;

pub type EventHandler = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    NodeCreated {
        workspace_id: String,
        root_id: String,
        node_id: String,
        node_type: String,
    },
    NodeUpdated {
        workspace_id: String,
        root_id: String,
        node_id: String,
        node_type: String,
    },
    NodeDeleted {
        workspace_id: String,
        root_id: String,
        node_id: String,
        node_type: String,
    },
    CollaboratorAdded {
        workspace_id: String,
        node_id: String,
        collaborator_id: String,
    },
    CollaboratorRemoved {
        workspace_id: String,
        node_id: String,
        collaborator_id: String,
    },
    InteractionUpdated {
        workspace_id: String,
        root_id: String,
        node_id: String,
        collaborator_id: String,
    },
    UploadUpdated {
        workspace_id: String,
        file_id: String,
        status: UploadStatus,
        progress: i32,
    },
    DownloadUpdated {
        workspace_id: String,
        file_id: String,
        status: DownloadStatus,
        progress: i32,
    },
    ServerAvailabilityChanged {
        domain: String,
        available: bool,
    },
    AccountUpdated {
        account_id: String,
    },
}

impl DomainEvent {
    /// Workspace the event belongs to, if it is workspace-scoped.
    pub fn workspace_id(&self) -> Option<&str> {
        match self {
            Self::NodeCreated { workspace_id, .. }
            | Self::NodeUpdated { workspace_id, .. }
            | Self::NodeDeleted { workspace_id, .. }
            | Self::CollaboratorAdded { workspace_id, .. }
            | Self::CollaboratorRemoved { workspace_id, .. }
            | Self::InteractionUpdated { workspace_id, .. }
            | Self::UploadUpdated { workspace_id, .. }
            | Self::DownloadUpdated { workspace_id, .. } => Some(workspace_id),
            Self::ServerAvailabilityChanged { .. } | Self::AccountUpdated { .. } => None,
        }
    }

    /// True for events produced by a committed node mutation.
    pub fn is_node_change(&self) -> bool {
        matches!(
            self,
            Self::NodeCreated { .. } | Self::NodeUpdated { .. } | Self::NodeDeleted { .. }
        )
    }
}

pub trait EventBus: Send + Sync {
    fn publish(&self, event: DomainEvent);
    fn subscribe(&self, handler: EventHandler) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Default in-process bus.
#[derive(Default)]
pub struct InMemoryEventBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, EventHandler)>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: DomainEvent) {
        // Snapshot the handlers so a handler may (un)subscribe without deadlocking.
        let handlers: Vec<EventHandler> = match self.subscribers.read() {
            Ok(guard) => guard.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_) => {
                warn!("[Events] Subscriber list is poisoned, dropping {:?}", event);
                return;
            }
        };
        for handler in handlers {
            handler(&event);
        }
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut guard) = self.subscribers.write() {
            guard.push((id, handler));
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut guard) = self.subscribers.write() {
            guard.retain(|(sub_id, _)| *sub_id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn account_event(id: &str) -> DomainEvent {
        DomainEvent::AccountUpdated {
            account_id: id.to_string(),
        }
    }

    #[test]
    fn subscribers_receive_published_events_until_unsubscribed() {
        let bus = InMemoryEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.subscribe(Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));

        bus.publish(account_event("a1"));
        bus.unsubscribe(id);
        bus.publish(account_event("a2"));

        assert_eq!(*seen.lock().unwrap(), vec![account_event("a1")]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself_while_publishing() {
        let bus = Arc::new(InMemoryEventBus::new());
        let calls = Arc::new(AtomicU64::new(0));
        let own_id = Arc::new(AtomicU64::new(0));

        let bus_ref = Arc::clone(&bus);
        let calls_ref = Arc::clone(&calls);
        let own_id_ref = Arc::clone(&own_id);
        let id = bus.subscribe(Arc::new(move |_| {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            bus_ref.unsubscribe(own_id_ref.load(Ordering::SeqCst));
        }));
        own_id.store(id, Ordering::SeqCst);

        bus.publish(account_event("a1"));
        bus.publish(account_event("a2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = DomainEvent::NodeDeleted {
            workspace_id: "w1".to_string(),
            root_id: "r1".to_string(),
            node_id: "n1".to_string(),
            node_type: "page".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "node_deleted");
        assert_eq!(event.workspace_id(), Some("w1"));
        assert!(event.is_node_change());
    }
}
