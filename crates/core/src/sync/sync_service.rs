use std::sync::Arc;

use log::{debug, warn};

use super::{
    ClientMessage, ServerMessage, SyncConsumerType, SyncCursorRepositoryTrait,
    INTERACTIONS_BATCH_LIMIT,
};
use crate::context::WorkspaceContext;
use crate::errors::Result;
use crate::interactions::InteractionService;
use crate::nodes::NodeService;

/// Client side of the sync socket: applies server batches and produces the
/// messages that acknowledge them.
pub struct SyncService {
    context: WorkspaceContext,
    nodes: Arc<NodeService>,
    interactions: Arc<InteractionService>,
    cursors: Arc<dyn SyncCursorRepositoryTrait>,
}

impl SyncService {
    pub fn new(
        context: WorkspaceContext,
        nodes: Arc<NodeService>,
        interactions: Arc<InteractionService>,
        cursors: Arc<dyn SyncCursorRepositoryTrait>,
    ) -> Self {
        Self {
            context,
            nodes,
            interactions,
            cursors,
        }
    }

    /// One `init_sync_consumer` per stream, starting from the stored cursors.
    pub fn init_messages(&self) -> Result<Vec<ClientMessage>> {
        SyncConsumerType::ALL
            .iter()
            .map(|consumer| {
                Ok(ClientMessage::InitSyncConsumer {
                    user_id: self.context.user_id.clone(),
                    consumer_type: *consumer,
                    cursor: self.cursors.get_cursor(&self.context.user_id, *consumer)?,
                })
            })
            .collect()
    }

    /// Applies every record of `message` in order, stores the new cursor and
    /// returns the acknowledgement to send. Records failing for good are
    /// skipped; any other failure aborts the batch before the cursor moves.
    pub async fn apply_message(&self, message: &ServerMessage) -> Result<Option<ClientMessage>> {
        if message.user_id() != self.context.user_id {
            warn!(
                "[Sync] Ignoring {} batch addressed to {}",
                message.consumer_type().as_str(),
                message.user_id()
            );
            return Ok(None);
        }

        match message {
            ServerMessage::TransactionsBatch { transactions, .. } => {
                for record in transactions {
                    let outcome = self.nodes.apply_server_transaction(record).await.map(|_| ());
                    skip_permanent(outcome, "transaction", &record.id)?;
                }
            }
            ServerMessage::CollaborationsBatch { collaborations, .. } => {
                for record in collaborations {
                    let outcome = self.nodes.apply_server_collaboration(record).await;
                    skip_permanent(outcome, "collaboration", &record.node_id)?;
                }
            }
            ServerMessage::DeletedCollaborationsBatch {
                deleted_collaborations,
                ..
            } => {
                for record in deleted_collaborations {
                    let outcome = self.nodes.apply_server_deleted_collaboration(record).await;
                    skip_permanent(outcome, "deleted collaboration", &record.node_id)?;
                }
            }
            ServerMessage::InteractionsBatch { interactions, .. } => {
                for record in interactions {
                    let outcome = self
                        .interactions
                        .apply_server_interaction(record)
                        .await
                        .map(|_| ());
                    skip_permanent(outcome, "interaction", &record.node_id)?;
                }
            }
        }

        let consumer = message.consumer_type();
        let stored = self.cursors.get_cursor(&self.context.user_id, consumer)?;
        let cursor = message.max_version().map_or(stored, |max| max.max(stored));
        if cursor > stored {
            self.cursors
                .set_cursor(&self.context.user_id, consumer, cursor)
                .await?;
        }
        debug!("[Sync] {} cursor at {}", consumer.as_str(), cursor);

        Ok(Some(ClientMessage::InitSyncConsumer {
            user_id: self.context.user_id.clone(),
            consumer_type: consumer,
            cursor,
        }))
    }

    /// Next batch of local interaction events to push, if any.
    pub async fn interactions_message(&self) -> Result<Option<ClientMessage>> {
        self.interactions
            .pending_sync_message(INTERACTIONS_BATCH_LIMIT as i64)
            .await
    }
}

fn skip_permanent(outcome: Result<()>, kind: &str, id: &str) -> Result<()> {
    match outcome {
        Err(err) if err.is_permanent() => {
            warn!("[Sync] Skipping {} {}: {}", kind, id, err);
            Ok(())
        }
        other => other,
    }
}
