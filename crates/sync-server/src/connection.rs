//! One actor per connected device.
//!
//! The actor owns every consumer of the connection and is the only place
//! their state changes. Client messages, domain events and finished queries
//! all arrive through its inbox; queries themselves run on spawned tasks and
//! report back with `FetchDone`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tandem_core::events::{DomainEvent, EventBus};
use tandem_core::sync::{
    ClientMessage, InteractionEventPayload, ServerMessage, SyncConsumerType,
};

use crate::consumer::SyncConsumer;
use crate::error::{Result, SyncServerError};
use crate::source::{fetch_batch, InteractionWriter, SyncRecordSource, SyncUser};

pub type ConnectionId = u64;

type ConsumerKey = (String, SyncConsumerType);

enum ConnectionCommand {
    Client(ClientMessage),
    Event(DomainEvent),
    FetchDone {
        key: ConsumerKey,
        cursor: i64,
        result: tandem_core::Result<Option<ServerMessage>>,
    },
    Close,
}

/// Handle used by the transport and the server hub to talk to a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    inbox: mpsc::UnboundedSender<ConnectionCommand>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send_client_message(&self, message: ClientMessage) -> Result<()> {
        self.inbox
            .send(ConnectionCommand::Client(message))
            .map_err(|_| SyncServerError::ConnectionClosed(format!("connection {}", self.id)))
    }

    /// Parses a raw socket frame and forwards it.
    pub fn handle_raw(&self, raw: &str) -> Result<()> {
        let message: ClientMessage = serde_json::from_str(raw)?;
        self.send_client_message(message)
    }

    pub fn notify(&self, event: &DomainEvent) {
        // A closed connection is pruned by the hub.
        let _ = self.inbox.send(ConnectionCommand::Event(event.clone()));
    }

    pub fn close(&self) {
        let _ = self.inbox.send(ConnectionCommand::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

struct SyncConnection {
    id: ConnectionId,
    users: HashMap<String, SyncUser>,
    consumers: HashMap<ConsumerKey, SyncConsumer>,
    source: Arc<dyn SyncRecordSource>,
    interactions: Arc<dyn InteractionWriter>,
    event_bus: Arc<dyn EventBus>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    inbox: mpsc::WeakUnboundedSender<ConnectionCommand>,
}

/// Starts the actor for a device signed in as `users`. Batches for the
/// device are pushed onto `outbound`. Must be called within a tokio runtime.
pub(crate) fn spawn_connection(
    id: ConnectionId,
    users: Vec<SyncUser>,
    source: Arc<dyn SyncRecordSource>,
    interactions: Arc<dyn InteractionWriter>,
    event_bus: Arc<dyn EventBus>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
) -> ConnectionHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    let connection = SyncConnection {
        id,
        users: users
            .into_iter()
            .map(|user| (user.user_id.clone(), user))
            .collect(),
        consumers: HashMap::new(),
        source,
        interactions,
        event_bus,
        outbound,
        inbox: sender.downgrade(),
    };
    tokio::spawn(connection.run(receiver));
    ConnectionHandle { id, inbox: sender }
}

/// Streams a domain event may have added records to.
fn affected_streams(event: &DomainEvent) -> &'static [SyncConsumerType] {
    match event {
        DomainEvent::NodeCreated { .. }
        | DomainEvent::NodeUpdated { .. }
        | DomainEvent::NodeDeleted { .. } => &[SyncConsumerType::Transactions],
        DomainEvent::CollaboratorAdded { .. } => &[
            SyncConsumerType::Collaborations,
            SyncConsumerType::Transactions,
        ],
        DomainEvent::CollaboratorRemoved { .. } => &[SyncConsumerType::DeletedCollaborations],
        DomainEvent::InteractionUpdated { .. } => &[SyncConsumerType::Interactions],
        _ => &[],
    }
}

impl SyncConnection {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ConnectionCommand>) {
        info!(
            connection = self.id,
            users = self.users.len(),
            "[SyncServer] Connection opened"
        );
        while let Some(command) = inbox.recv().await {
            match command {
                ConnectionCommand::Client(message) => self.handle_client_message(message),
                ConnectionCommand::Event(event) => self.handle_event(&event),
                ConnectionCommand::FetchDone {
                    key,
                    cursor,
                    result,
                } => self.handle_fetch_done(key, cursor, result),
                ConnectionCommand::Close => break,
            }
            if self.outbound.is_closed() {
                debug!(connection = self.id, "[SyncServer] Outbound socket gone");
                break;
            }
        }
        info!(connection = self.id, "[SyncServer] Connection closed");
    }

    fn handle_client_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::InitSyncConsumer {
                user_id,
                consumer_type,
                cursor,
            } => self.init_consumer(user_id, consumer_type, cursor),
            ClientMessage::SyncInteractions {
                user_id,
                workspace_id,
                events,
            } => self.sync_interactions(user_id, workspace_id, events),
        }
    }

    fn init_consumer(&mut self, user_id: String, consumer_type: SyncConsumerType, cursor: i64) {
        let Some(user) = self.users.get(&user_id).cloned() else {
            warn!(
                connection = self.id,
                user_id = %user_id,
                "[SyncServer] Consumer requested for a user not on this connection"
            );
            return;
        };

        let key = (user_id, consumer_type);
        let start = match self.consumers.get_mut(&key) {
            Some(consumer) => consumer.update_cursor(cursor),
            None => {
                debug!(
                    connection = self.id,
                    user_id = %user.user_id,
                    consumer = consumer_type.as_str(),
                    cursor,
                    "[SyncServer] New consumer"
                );
                self.consumers
                    .entry(key.clone())
                    .or_insert_with(|| SyncConsumer::new(user, consumer_type, cursor))
                    .offer_fetch()
            }
        };
        if start {
            self.spawn_fetch(key);
        }
    }

    fn sync_interactions(
        &mut self,
        user_id: String,
        workspace_id: String,
        events: Vec<InteractionEventPayload>,
    ) {
        let Some(user) = self.users.get(&user_id).cloned() else {
            warn!(
                connection = self.id,
                user_id = %user_id,
                "[SyncServer] Interactions from a user not on this connection"
            );
            return;
        };
        if user.workspace_id != workspace_id {
            warn!(
                connection = self.id,
                user_id = %user_id,
                workspace_id = %workspace_id,
                "[SyncServer] Interactions for a foreign workspace dropped"
            );
            return;
        }
        if events.is_empty() {
            return;
        }

        let writer = Arc::clone(&self.interactions);
        let event_bus = Arc::clone(&self.event_bus);
        tokio::spawn(async move {
            match writer.write_events(&user, events).await {
                Ok(changed) => {
                    for record in changed {
                        event_bus.publish(DomainEvent::InteractionUpdated {
                            workspace_id: record.workspace_id,
                            root_id: record.root_id,
                            node_id: record.node_id,
                            collaborator_id: record.collaborator_id,
                        });
                    }
                }
                Err(e) => warn!(
                    user_id = %user.user_id,
                    "[SyncServer] Failed to write interactions: {}", e
                ),
            }
        });
    }

    fn handle_event(&mut self, event: &DomainEvent) {
        let Some(workspace_id) = event.workspace_id() else {
            return;
        };
        let streams = affected_streams(event);
        if streams.is_empty() {
            return;
        }

        let mut wake = Vec::new();
        for (key, consumer) in self.consumers.iter_mut() {
            if consumer.user().workspace_id != workspace_id || !streams.contains(&key.1) {
                continue;
            }
            if consumer.offer_fetch() {
                wake.push(key.clone());
            }
        }
        for key in wake {
            self.spawn_fetch(key);
        }
    }

    fn handle_fetch_done(
        &mut self,
        key: ConsumerKey,
        cursor: i64,
        result: tandem_core::Result<Option<ServerMessage>>,
    ) {
        let Some(consumer) = self.consumers.get_mut(&key) else {
            return;
        };

        let delivered = if consumer.cursor() != cursor {
            // The client moved on while the query ran.
            false
        } else {
            match result {
                Ok(Some(message)) => {
                    debug!(
                        connection = self.id,
                        user_id = %key.0,
                        consumer = key.1.as_str(),
                        cursor,
                        next = message.max_version(),
                        "[SyncServer] Pushing batch"
                    );
                    self.outbound.send(message).is_ok()
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(
                        connection = self.id,
                        user_id = %key.0,
                        consumer = key.1.as_str(),
                        "[SyncServer] Fetch failed: {}", e
                    );
                    false
                }
            }
        };

        if consumer.complete_fetch(delivered) {
            self.spawn_fetch(key);
        }
    }

    fn spawn_fetch(&self, key: ConsumerKey) {
        let Some(consumer) = self.consumers.get(&key) else {
            return;
        };
        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        let source = Arc::clone(&self.source);
        let user = consumer.user().clone();
        let cursor = consumer.cursor();
        tokio::spawn(async move {
            let result = fetch_batch(source.as_ref(), &user, key.1, cursor).await;
            let _ = inbox.send(ConnectionCommand::FetchDone {
                key,
                cursor,
                result,
            });
        });
    }
}
