//! Connection hub. Fans domain events out to every live connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::info;

use tandem_core::events::{DomainEvent, EventBus, SubscriptionId};
use tandem_core::sync::ServerMessage;

use crate::connection::{spawn_connection, ConnectionHandle, ConnectionId};
use crate::source::{InteractionWriter, SyncRecordSource, SyncUser};

pub struct SyncServer {
    source: Arc<dyn SyncRecordSource>,
    interactions: Arc<dyn InteractionWriter>,
    event_bus: Arc<dyn EventBus>,
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    next_id: AtomicU64,
    subscription: SubscriptionId,
}

impl SyncServer {
    pub fn new(
        source: Arc<dyn SyncRecordSource>,
        interactions: Arc<dyn InteractionWriter>,
        event_bus: Arc<dyn EventBus>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|server: &Weak<SyncServer>| {
            let server = server.clone();
            let subscription = event_bus.subscribe(Arc::new(move |event: &DomainEvent| {
                if let Some(server) = server.upgrade() {
                    server.broadcast(event);
                }
            }));
            SyncServer {
                source,
                interactions,
                event_bus,
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                subscription,
            }
        })
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a device signed in as `users`. Batches are pushed onto
    /// `outbound`; the connection ends when its receiver is dropped.
    pub fn connect(
        &self,
        users: Vec<SyncUser>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = spawn_connection(
            id,
            users,
            Arc::clone(&self.source),
            Arc::clone(&self.interactions),
            Arc::clone(&self.event_bus),
            outbound,
        );
        self.connections().insert(id, handle.clone());
        handle
    }

    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(handle) = self.connections().remove(&id) {
            handle.close();
        }
    }

    pub fn connection_count(&self) -> usize {
        let mut connections = self.connections();
        connections.retain(|_, handle| !handle.is_closed());
        connections.len()
    }

    fn broadcast(&self, event: &DomainEvent) {
        let mut connections = self.connections();
        connections.retain(|_, handle| !handle.is_closed());
        for handle in connections.values() {
            handle.notify(event);
        }
    }

    /// Stops listening for events and closes every connection.
    pub fn shutdown(&self) {
        self.event_bus.unsubscribe(self.subscription);
        let drained: Vec<ConnectionHandle> =
            self.connections().drain().map(|(_, handle)| handle).collect();
        info!(connections = drained.len(), "[SyncServer] Shutting down");
        for handle in drained {
            handle.close();
        }
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        self.event_bus.unsubscribe(self.subscription);
    }
}
